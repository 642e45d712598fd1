//! Authentication module for the console API
//!
//! Password, social and magic-link login against the console's token
//! endpoints, persisted credentials, single-flight refresh, and role/scope
//! checks derived from the access token's claims.

pub mod access;
pub mod claims;
mod error;
pub mod session;
pub mod tokens;

pub use access::{Access, AnyOf, Requirement};
pub use claims::{decode, Claims};
pub use error::SessionError;
pub use session::{Phase, SessionManager, SessionState};
pub use tokens::{CredentialPair, StoredToken, TokenStore};
