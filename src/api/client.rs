//! Authorized HTTP client for the console API
//!
//! Attaches the session's access token to every call and maps response
//! status to outcomes. A 401 triggers one shared refresh and exactly one
//! retry; anything past that is a hard failure.

use std::sync::Arc;

use super::transport::{Body, HttpRequest, HttpResponse};
use super::{ApiRequest, ApiResponse, RateLimited};
use crate::auth::{SessionError, SessionManager};

/// Where a request is in the refresh-and-retry protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    RetriedAfterRefresh,
}

/// Client bound to one session.
#[derive(Clone)]
pub struct ApiClient {
    session: Arc<SessionManager>,
}

impl ApiClient {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, SessionError> {
        self.execute(&ApiRequest::get(path)).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<ApiResponse, SessionError> {
        self.execute(&ApiRequest::post(path).json(body)).await
    }

    pub async fn put(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<ApiResponse, SessionError> {
        self.execute(&ApiRequest::put(path).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, SessionError> {
        self.execute(&ApiRequest::delete(path)).await
    }

    /// Send `request` with the current credentials.
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, SessionError> {
        let (mut bearer, epoch) = self.session.bearer()?;
        let mut attempt = Attempt::First;

        loop {
            let response = self.dispatch(request, bearer.as_deref()).await?;

            match (response.status, attempt) {
                (401, Attempt::First) => {
                    tracing::debug!("401 for {}, refreshing and retrying once", request.path);
                    let pair = self.session.refresh_after(epoch).await.map_err(|e| {
                        tracing::warn!("Refresh after 401 failed: {}", e);
                        SessionError::AuthenticationExpired
                    })?;
                    bearer = Some(pair.access_token);
                    attempt = Attempt::RetriedAfterRefresh;
                }
                (401, Attempt::RetriedAfterRefresh) => {
                    tracing::warn!("401 for {} after refresh, logging out", request.path);
                    self.session.logout();
                    return Err(SessionError::AuthenticationFailed);
                }
                _ => return self.interpret(request, response),
            }
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<HttpResponse, SessionError> {
        let mut url = self.session.endpoint(&request.path)?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }

        let http = HttpRequest {
            method: request.method.clone(),
            url,
            bearer: bearer.map(str::to_string),
            body: match &request.body {
                Some(body) => Body::Json(body.clone()),
                None => Body::Empty,
            },
        };

        Ok(self.session.transport().send(http).await?)
    }

    fn interpret(
        &self,
        request: &ApiRequest,
        response: HttpResponse,
    ) -> Result<ApiResponse, SessionError> {
        match response.status {
            403 => {
                tracing::warn!("403 for {}, logging out", request.path);
                self.session.logout();
                Err(SessionError::AccessForbidden)
            }
            429 => {
                let msg = response
                    .error_detail()
                    .unwrap_or_else(|| String::from_utf8_lossy(&response.body).into_owned());
                tracing::warn!("Rate limited on {}: {}", request.path, msg);
                Ok(ApiResponse::RateLimited(RateLimited {
                    error: "Too many requests".to_string(),
                    msg,
                    status: 429,
                }))
            }
            _ if !response.is_success() => Err(SessionError::RequestFailed {
                status: response.status,
            }),
            _ if request.binary => Ok(ApiResponse::Binary(response.body)),
            _ if response.body.iter().all(u8::is_ascii_whitespace) => {
                Ok(ApiResponse::Json(serde_json::Value::Null))
            }
            _ => Ok(ApiResponse::Json(response.json()?)),
        }
    }
}
