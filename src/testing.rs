//! Test helpers: token minting and a scripted transport

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use futures::future::BoxFuture;

use crate::api::transport::{HttpRequest, HttpResponse, Transport};
use crate::auth::{CredentialPair, SessionManager};
use crate::config::Settings;
use crate::storage::MemoryStore;

pub fn settings() -> Settings {
    Settings::with_api_url("https://console.test/api")
}

pub fn encode_segment(value: &serde_json::Value) -> String {
    URL_SAFE_NO_PAD.encode(value.to_string())
}

/// Unsigned three-segment token carrying the given claims.
pub fn mint_token(sub: &str, exp: i64, roles: &[&str], scopes: &[&str]) -> String {
    let header = serde_json::json!({"alg": "HS256", "typ": "JWT"});
    let payload = serde_json::json!({
        "sub": sub,
        "exp": exp,
        "roles": roles,
        "scopes": scopes,
    });
    format!(
        "{}.{}.{}",
        encode_segment(&header),
        encode_segment(&payload),
        URL_SAFE_NO_PAD.encode(b"signature")
    )
}

/// Token endpoint response body for `access_token`.
pub fn pair_json(access_token: &str) -> serde_json::Value {
    let now = Utc::now();
    serde_json::json!({
        "accessToken": access_token,
        "accessTokenExpires": (now + Duration::minutes(15)).to_rfc3339(),
        "refreshToken": format!("refresh-for-{}", access_token.len()),
        "refreshTokenExpires": (now + Duration::days(7)).to_rfc3339(),
    })
}

pub fn credential_pair(access_token: &str) -> CredentialPair {
    let now = Utc::now();
    CredentialPair {
        access_token: access_token.to_string(),
        access_token_expires: now + Duration::minutes(15),
        refresh_token: "refresh-1".to_string(),
        refresh_token_expires: now + Duration::days(7),
    }
}

/// Pair whose access token has lapsed but whose refresh token is still good.
pub fn expired_pair(access_token: &str, refresh_token: &str) -> CredentialPair {
    let now = Utc::now();
    CredentialPair {
        access_token: access_token.to_string(),
        access_token_expires: now - Duration::minutes(1),
        refresh_token: refresh_token.to_string(),
        refresh_token_expires: now + Duration::days(7),
    }
}

pub fn json_response(status: u16, body: serde_json::Value) -> HttpResponse {
    HttpResponse {
        status,
        body: body.to_string().into_bytes(),
    }
}

type Handler = dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync;

/// Answers every request through `handler` and records it.
///
/// Each response is delivered after one scheduler yield, so concurrent
/// callers interleave the way they would against a real server.
pub struct StubTransport {
    handler: Box<Handler>,
    log: Mutex<Vec<HttpRequest>>,
    slow: Option<(String, StdDuration)>,
}

impl StubTransport {
    pub fn new(
        handler: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            log: Mutex::new(Vec::new()),
            slow: None,
        })
    }

    /// Like `new`, but requests whose path ends with `suffix` take `delay`
    /// to answer.
    pub fn slow(
        suffix: &str,
        delay: StdDuration,
        handler: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            log: Mutex::new(Vec::new()),
            slow: Some((suffix.to_string(), delay)),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().unwrap().clone()
    }

    /// Number of requests whose path ends with `suffix`.
    pub fn count(&self, suffix: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.path().ends_with(suffix))
            .count()
    }
}

impl Transport for StubTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, anyhow::Result<HttpResponse>> {
        let response = (self.handler)(&request);
        let delay = self
            .slow
            .as_ref()
            .filter(|(suffix, _)| request.url.path().ends_with(suffix.as_str()))
            .map(|(_, delay)| *delay);
        self.log.lock().unwrap().push(request);
        Box::pin(async move {
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => tokio::task::yield_now().await,
            }
            Ok(response)
        })
    }
}

/// Session over an in-memory store, plus the store for inspection.
pub fn manager(transport: Arc<StubTransport>) -> (Arc<SessionManager>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let session = SessionManager::new(settings(), transport, store.clone());
    (Arc::new(session), store)
}
