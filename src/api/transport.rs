//! HTTP transport seam
//!
//! The session manager and the authorized client only see `HttpRequest` and
//! `HttpResponse`. `ReqwestTransport` is the real network implementation.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::Method;
use serde::de::DeserializeOwned;
use url::Url;

use crate::auth::SessionError;

/// Request payload encoding
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    /// Sent as `Authorization: Bearer <token>`
    pub bearer: Option<String>,
    pub body: Body,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            bearer: None,
            body: Body::Empty,
        }
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Body::Json(body);
        self
    }

    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        self.body = Body::Form(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    pub fn bearer(mut self, token: Option<&str>) -> Self {
        self.bearer = token.map(str::to_string);
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            SessionError::InvalidResponse(format!("HTTP {} body: {}", self.status, e))
        })
    }

    /// The server's explanation for an error response: the first of
    /// `detail`, `message` or `error` that is a string.
    pub fn error_detail(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(&self.body).ok()?;
        ["detail", "message", "error"]
            .iter()
            .find_map(|field| value.get(*field).and_then(|v| v.as_str()))
            .map(String::from)
    }
}

/// Sends one HTTP exchange. No retries, no timeouts; those belong to the caller
/// or the underlying client.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>>;
}

/// `reqwest`-backed transport
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin(async move {
            tracing::debug!("{} {}", request.method, request.url);

            let mut builder = self.http.request(request.method.clone(), request.url.clone());
            if let Some(token) = &request.bearer {
                builder = builder.bearer_auth(token);
            }
            builder = match &request.body {
                Body::Empty if request.method == Method::GET => builder,
                Body::Empty => builder.header("Content-Length", "0"),
                Body::Json(value) => builder.json(value),
                Body::Form(fields) => builder.form(fields),
            };

            let resp = builder
                .send()
                .await
                .with_context(|| format!("{} {} failed", request.method, request.url))?;

            let status = resp.status().as_u16();
            let body = resp
                .bytes()
                .await
                .with_context(|| format!("Failed to read response body from {}", request.url))?;

            tracing::debug!("{} {} -> {}", request.method, request.url, status);
            Ok(HttpResponse {
                status,
                body: body.to_vec(),
            })
        })
    }
}
