//! Session lifecycle: login, logout, mount-time validation and refresh
//!
//! `SessionManager` is the only writer of `SessionState`. Every credential
//! change (new pair, logout) bumps an epoch; the refresh gate uses it to tell
//! whether someone else already refreshed while a caller was waiting, so only
//! one refresh exchange is ever in flight.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use url::Url;

use super::access::{Access, AnyOf, Requirement};
use super::claims::{self, Claims};
use super::tokens::{CredentialPair, TokenStore};
use super::SessionError;
use crate::api::client::ApiClient;
use crate::api::transport::{HttpRequest, HttpResponse, Transport};
use crate::config::Settings;
use crate::storage::KeyValueStore;

/// Lifecycle position of the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Phase {
    #[default]
    Anonymous,
    LoggingIn,
    Authenticated,
    Refreshing,
}

/// Read-only view of the session handed to the UI, guards and the client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub phase: Phase,
    pub is_authenticated: bool,
    pub is_logging_in: bool,
    pub current_subject: Option<String>,
    pub roles: BTreeSet<String>,
    pub scopes: BTreeSet<String>,
    pub client_id: Option<String>,
    /// Access token `exp`, epoch seconds
    pub access_expires_at: Option<i64>,
}

impl SessionState {
    fn from_claims(claims: &Claims) -> Self {
        Self {
            phase: Phase::Authenticated,
            is_authenticated: true,
            is_logging_in: false,
            current_subject: Some(claims.subject.clone()),
            roles: claims.roles.clone(),
            scopes: claims.scopes.clone(),
            client_id: claims.client_id.clone(),
            access_expires_at: Some(claims.expires_at),
        }
    }
}

/// Outcome of installing a credential pair
enum Applied {
    Installed(CredentialPair),
    /// Credentials changed since the exchange started; the pair was dropped.
    Superseded,
}

#[derive(Debug, Default)]
struct Tracked {
    state: SessionState,
    epoch: u64,
}

/// Owns the credentials and the session state derived from them.
pub struct SessionManager {
    settings: Settings,
    transport: Arc<dyn Transport>,
    tokens: TokenStore,
    tracked: RwLock<Tracked>,
    refresh_gate: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        settings: Settings,
        transport: Arc<dyn Transport>,
        backend: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            settings,
            transport,
            tokens: TokenStore::new(backend),
            tracked: RwLock::new(Tracked::default()),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Authorized client sharing this session.
    pub fn client(self: &Arc<Self>) -> ApiClient {
        ApiClient::new(Arc::clone(self))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tracked> {
        self.tracked.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tracked> {
        self.tracked.write().unwrap_or_else(|e| e.into_inner())
    }

    // ---- read side ----

    pub fn state(&self) -> SessionState {
        self.read().state.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().state.is_authenticated
    }

    pub fn is_logging_in(&self) -> bool {
        self.read().state.is_logging_in
    }

    pub fn current_subject(&self) -> Option<String> {
        self.read().state.current_subject.clone()
    }

    /// True if the session holds the role, or any of the listed roles.
    pub fn has_role<'a>(&self, required: impl Into<AnyOf<'a>>) -> bool {
        let tracked = self.read();
        tracked.state.is_authenticated && required.into().matches(&tracked.state.roles)
    }

    /// True if the session holds the scope, or any of the listed scopes.
    pub fn has_scope<'a>(&self, required: impl Into<AnyOf<'a>>) -> bool {
        let tracked = self.read();
        tracked.state.is_authenticated && required.into().matches(&tracked.state.scopes)
    }

    /// Guard decision for a view.
    pub fn authorize(&self, requirement: &Requirement) -> Access {
        if !self.is_authenticated() {
            return Access::LoginRequired;
        }
        let granted = match requirement {
            Requirement::Authenticated => true,
            Requirement::AnyRole(roles) => self.has_role(roles),
            Requirement::AnyScope(scopes) => self.has_scope(scopes),
        };
        if granted {
            Access::Granted
        } else {
            Access::Forbidden
        }
    }

    /// Access token to attach to a request, and the epoch it belongs to.
    pub(crate) fn bearer(&self) -> Result<(Option<String>, u64), SessionError> {
        let tracked = self.read();
        let token = self.tokens.access_token()?;
        Ok((token, tracked.epoch))
    }

    fn epoch(&self) -> u64 {
        self.read().epoch
    }

    // ---- lifecycle ----

    /// Rebuild the session from persisted credentials.
    ///
    /// Run once at startup; safe to run again to re-validate. A valid access
    /// token restores the session without network traffic, an expired one is
    /// refreshed if the refresh token is still good, anything else logs out.
    pub async fn mount(&self) -> Result<(), SessionError> {
        let pair = match self.tokens.get() {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                tracing::debug!("No stored credentials");
                self.logout();
                return Ok(());
            }
            Err(e) => {
                tracing::warn!("Stored credentials unreadable: {}", e);
                self.logout();
                return Err(e.into());
            }
        };

        let claims = match claims::decode(&pair.access_token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!("Stored access token is malformed, logging out");
                self.logout();
                return Err(e);
            }
        };

        let now = Utc::now();
        if !claims.is_expired(now, self.settings.clock_skew_secs) {
            let mut tracked = self.write();
            tracked.state = SessionState::from_claims(&claims);
            tracing::info!("Session restored for {}", claims.subject);
            return Ok(());
        }

        if pair.refresh_token_valid(now, self.settings.clock_skew_secs) {
            tracing::info!("Access token expired, refreshing...");
            self.refresh().await.map(|_| ())
        } else {
            tracing::info!("Access and refresh tokens expired, logging out");
            self.logout();
            Ok(())
        }
    }

    /// Password login against the token endpoint.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<(), SessionError> {
        tracing::info!("Logging in as {}", identifier);
        let url = self.endpoint(&self.settings.endpoints.token)?;
        let request =
            HttpRequest::post(url).form(&[("username", identifier), ("password", secret)]);
        self.login_with(request).await
    }

    /// Exchange a third-party provider payload for credentials.
    pub async fn social_login(
        &self,
        provider: &str,
        payload: serde_json::Value,
    ) -> Result<(), SessionError> {
        tracing::info!("Logging in via {}", provider);
        let url = self.endpoint(&self.settings.endpoints.social_login)?;
        let request = HttpRequest::post(url).json(serde_json::json!({
            "provider": provider,
            "data": payload,
        }));
        self.login_with(request).await
    }

    /// Exchange a one-time magic-link token for credentials.
    pub async fn magic_link_login(&self, token: &str) -> Result<(), SessionError> {
        tracing::info!("Validating magic link");
        let url = self.endpoint(&self.settings.endpoints.magic_link)?;
        let request = HttpRequest::post(url).json(serde_json::json!({ "token": token }));
        self.login_with(request).await
    }

    async fn login_with(&self, request: HttpRequest) -> Result<(), SessionError> {
        {
            let mut tracked = self.write();
            tracked.state.phase = Phase::LoggingIn;
            tracked.state.is_logging_in = true;
        }

        let result = match self.transport.send(request).await {
            Ok(resp) if resp.is_success() => resp
                .json::<CredentialPair>()
                .and_then(|pair| self.apply(pair, None)),
            Ok(resp) => Err(login_error(&resp)),
            Err(e) => Err(SessionError::Transport(e)),
        };

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!("Login failed: {}", e);
                self.logout();
                Err(e)
            }
        }
    }

    /// Trade the refresh token for a new credential pair.
    ///
    /// Single-flight: a caller arriving while a refresh is running waits for
    /// it and gets its outcome. On failure the session is logged out.
    pub async fn refresh(&self) -> Result<CredentialPair, SessionError> {
        let observed = self.epoch();
        self.refresh_after(observed).await
    }

    /// Refresh unless the credentials moved on since epoch `observed`.
    pub(crate) async fn refresh_after(
        &self,
        observed: u64,
    ) -> Result<CredentialPair, SessionError> {
        let _gate = self.refresh_gate.lock().await;

        if self.epoch() != observed {
            tracing::debug!("Credentials changed while waiting, reusing them");
            return self.current_pair();
        }

        let pair = match self.tokens.get() {
            Ok(Some(pair)) if pair.refresh_token_valid(Utc::now(), self.settings.clock_skew_secs) => {
                pair
            }
            Ok(_) => {
                tracing::info!("No usable refresh token, logging out");
                self.logout();
                return Err(SessionError::AuthenticationExpired);
            }
            Err(e) => {
                self.logout();
                return Err(e.into());
            }
        };

        let url = match self.endpoint(&self.settings.endpoints.refresh) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Token refresh failed: {}", e);
                self.logout();
                return Err(e);
            }
        };

        {
            // Mount-time refreshes start from Anonymous and stay there until applied.
            let mut tracked = self.write();
            if tracked.state.is_authenticated {
                tracked.state.phase = Phase::Refreshing;
            }
        }
        tracing::info!("Refreshing access token...");

        let request = HttpRequest::post(url).json(serde_json::json!({
            "refreshToken": pair.refresh_token,
        }));

        let result = match self.transport.send(request).await {
            Ok(resp) if resp.is_success() => resp
                .json::<CredentialPair>()
                .and_then(|pair| self.apply(pair, Some(observed))),
            Ok(resp) => {
                tracing::warn!("Refresh rejected (HTTP {})", resp.status);
                Err(SessionError::AuthenticationExpired)
            }
            Err(e) => Err(SessionError::Transport(e)),
        };

        match result {
            Ok(Applied::Installed(pair)) => {
                tracing::info!("Token refresh complete");
                Ok(pair)
            }
            Ok(Applied::Superseded) => {
                tracing::debug!("Credentials changed during refresh, discarding its result");
                self.current_pair()
            }
            Err(e) => {
                tracing::warn!("Token refresh failed: {}", e);
                if self.logout_at(observed) {
                    Err(e)
                } else {
                    tracing::debug!("Credentials changed during refresh, keeping them");
                    self.current_pair()
                }
            }
        }
    }

    /// Whatever pair is stored now; none means the session ended.
    fn current_pair(&self) -> Result<CredentialPair, SessionError> {
        match self.tokens.get()? {
            Some(pair) => Ok(pair),
            None => Err(SessionError::AuthenticationExpired),
        }
    }

    /// Clear stored credentials and reset to anonymous. Idempotent.
    pub fn logout(&self) {
        let mut tracked = self.write();
        self.reset(&mut tracked);
    }

    /// Log out only if the credentials are still those of epoch `epoch`.
    fn logout_at(&self, epoch: u64) -> bool {
        let mut tracked = self.write();
        if tracked.epoch != epoch {
            return false;
        }
        self.reset(&mut tracked);
        true
    }

    fn reset(&self, tracked: &mut Tracked) {
        if let Err(e) = self.tokens.clear() {
            tracing::warn!("Failed to clear stored credentials: {}", e);
        }
        if tracked.state.is_authenticated {
            tracing::info!("Logged out");
        }
        tracked.state = SessionState::default();
        tracked.epoch += 1;
    }

    /// Install a new pair: decode, persist, then swap the state in one step.
    ///
    /// With `expected` set, the pair is dropped if the credentials changed in
    /// the meantime: a logout during a refresh stays a logout, and a login
    /// during a refresh keeps the login's pair.
    fn apply(&self, pair: CredentialPair, expected: Option<u64>) -> Result<Applied, SessionError> {
        let claims = claims::decode(&pair.access_token)?;

        let mut tracked = self.write();
        if expected.is_some_and(|epoch| epoch != tracked.epoch) {
            return Ok(Applied::Superseded);
        }
        self.tokens.set(&pair, &claims.subject)?;
        tracked.state = SessionState::from_claims(&claims);
        tracked.epoch += 1;

        tracing::info!(
            "Session established for {} ({} roles, {} scopes)",
            claims.subject,
            claims.roles.len(),
            claims.scopes.len()
        );
        Ok(Applied::Installed(pair))
    }

    /// Ask the server to grade a password. Does not touch the session.
    pub async fn check_password_strength(
        &self,
        password: &str,
    ) -> Result<serde_json::Value, SessionError> {
        let url = self.endpoint(&self.settings.endpoints.check_password)?;
        let request = HttpRequest::post(url).json(serde_json::Value::String(password.to_string()));
        let resp = self.transport.send(request).await?;
        if !resp.is_success() {
            return Err(SessionError::RequestFailed {
                status: resp.status,
            });
        }
        resp.json()
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, SessionError> {
        self.settings
            .endpoint_url(path)
            .map_err(|e| SessionError::InvalidEndpoint(format!("{:#}", e)))
    }
}

/// Classify a rejected login exchange.
fn login_error(resp: &HttpResponse) -> SessionError {
    match resp.status {
        400 | 401 | 403 | 422 => SessionError::InvalidCredentials(
            resp.error_detail()
                .unwrap_or_else(|| "credentials rejected".to_string()),
        ),
        status => SessionError::RequestFailed { status },
    }
}
