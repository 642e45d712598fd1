//! Console session - client-side authentication for the admin console
//!
//! Acquires, persists, decodes and refreshes the console's bearer
//! credentials, injects them into API calls, and answers role/scope
//! questions for the UI layer.

pub mod api;
pub mod auth;
pub mod config;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use api::client::ApiClient;
pub use api::{ApiRequest, ApiResponse, RateLimited};
pub use auth::{Access, AnyOf, Claims, CredentialPair, Phase, Requirement, SessionError};
pub use auth::{SessionManager, SessionState, TokenStore};
pub use config::Settings;
