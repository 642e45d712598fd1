//! Authorized API access for the console backend

pub mod client;
pub mod transport;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::auth::SessionError;

/// A call against the console API, relative to the configured base URL
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub query: Vec<(String, String)>,
    /// Return the raw payload instead of parsing JSON
    pub binary: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: Vec::new(),
            binary: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn binary(mut self) -> Self {
        self.binary = true;
        self
    }
}

/// Body of a 429, handed back as data so callers can tell throttling
/// apart from a broken session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimited {
    pub error: String,
    pub msg: String,
    pub status: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Json(serde_json::Value),
    Binary(Vec<u8>),
    RateLimited(RateLimited),
}

impl ApiResponse {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiResponse::RateLimited(_))
    }

    /// Deserialize a JSON response into `T`.
    pub fn into_json<T: serde::de::DeserializeOwned>(self) -> Result<T, SessionError> {
        match self {
            ApiResponse::Json(value) => serde_json::from_value(value)
                .map_err(|e| SessionError::InvalidResponse(e.to_string())),
            ApiResponse::Binary(_) => Err(SessionError::InvalidResponse(
                "expected JSON, got a binary payload".to_string(),
            )),
            ApiResponse::RateLimited(limited) => Err(SessionError::InvalidResponse(format!(
                "rate limited: {}",
                limited.msg
            ))),
        }
    }
}
