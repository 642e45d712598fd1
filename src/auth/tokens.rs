//! Token storage and management

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{KeyValueStore, StoreError};

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const CURRENT_USER_KEY: &str = "currentUser";

const ALL_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, CURRENT_USER_KEY];

const MAX_SKEW_SECS: u64 = 3600;

/// Access and refresh credentials as issued by the token endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    pub access_token_expires: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires: DateTime<Utc>,
}

impl CredentialPair {
    pub fn refresh_token_valid(&self, now: DateTime<Utc>, skew_secs: u64) -> bool {
        let skew = chrono::Duration::seconds(skew_secs.min(MAX_SKEW_SECS) as i64);
        !self.refresh_token.is_empty() && now + skew < self.refresh_token_expires
    }
}

/// One persisted token entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl StoredToken {
    fn encode(key: &str, token: &str, expires_at: DateTime<Utc>) -> Result<String, StoreError> {
        let entry = StoredToken {
            token: token.to_string(),
            expires_at,
        };
        serde_json::to_string(&entry).map_err(|_| StoreError::Corrupt(key.to_string()))
    }

    fn decode(key: &str, raw: &str) -> Result<Self, StoreError> {
        serde_json::from_str(raw).map_err(|_| StoreError::Corrupt(key.to_string()))
    }
}

/// Persists the credential pair and the subject cache.
///
/// `set` writes all three entries in one batch; `clear` removes them in one
/// batch. A pair is only returned when both token entries are present.
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub fn get(&self) -> Result<Option<CredentialPair>, StoreError> {
        let access = self.backend.load(ACCESS_TOKEN_KEY)?;
        let refresh = self.backend.load(REFRESH_TOKEN_KEY)?;

        let (access, refresh) = match (access, refresh) {
            (Some(a), Some(r)) => (a, r),
            _ => return Ok(None),
        };

        let access = StoredToken::decode(ACCESS_TOKEN_KEY, &access)?;
        let refresh = StoredToken::decode(REFRESH_TOKEN_KEY, &refresh)?;

        Ok(Some(CredentialPair {
            access_token: access.token,
            access_token_expires: access.expires_at,
            refresh_token: refresh.token,
            refresh_token_expires: refresh.expires_at,
        }))
    }

    /// Current access token, if any pair is stored.
    pub fn access_token(&self) -> Result<Option<String>, StoreError> {
        Ok(self.get()?.map(|pair| pair.access_token))
    }

    /// Subject decoded at the last successful `set`.
    pub fn current_subject(&self) -> Result<Option<String>, StoreError> {
        self.backend.load(CURRENT_USER_KEY)
    }

    pub fn set(&self, pair: &CredentialPair, subject: &str) -> Result<(), StoreError> {
        let entries = [
            (
                ACCESS_TOKEN_KEY,
                StoredToken::encode(ACCESS_TOKEN_KEY, &pair.access_token, pair.access_token_expires)?,
            ),
            (
                REFRESH_TOKEN_KEY,
                StoredToken::encode(
                    REFRESH_TOKEN_KEY,
                    &pair.refresh_token,
                    pair.refresh_token_expires,
                )?,
            ),
            (CURRENT_USER_KEY, subject.to_string()),
        ];
        self.backend.store(&entries)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.backend.remove(&ALL_KEYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, MemoryStore};
    use chrono::Duration;

    fn pair(access: &str, refresh: &str) -> CredentialPair {
        let now = Utc::now();
        CredentialPair {
            access_token: access.to_string(),
            access_token_expires: now + Duration::minutes(15),
            refresh_token: refresh.to_string(),
            refresh_token_expires: now + Duration::days(7),
        }
    }

    #[test]
    fn test_empty_store_has_no_pair() {
        let store = TokenStore::new(Arc::new(MemoryStore::new()));
        assert!(store.get().unwrap().is_none());
        assert!(store.access_token().unwrap().is_none());
    }

    #[test]
    fn test_set_replaces_whole_pair() {
        let store = TokenStore::new(Arc::new(MemoryStore::new()));
        store.set(&pair("a1", "r1"), "alice").unwrap();
        let second = pair("a2", "r2");
        store.set(&second, "alice").unwrap();

        assert_eq!(store.get().unwrap(), Some(second));
        assert_eq!(store.current_subject().unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn test_clear_removes_all_entries() {
        let backend = Arc::new(MemoryStore::new());
        let store = TokenStore::new(backend.clone());
        store.set(&pair("a", "r"), "alice").unwrap();
        store.clear().unwrap();

        for key in ALL_KEYS {
            assert!(backend.load(key).unwrap().is_none(), "{} survived clear", key);
        }
        // Clearing twice is fine.
        store.clear().unwrap();
    }

    #[test]
    fn test_half_a_pair_is_no_pair() {
        let backend = Arc::new(MemoryStore::new());
        let store = TokenStore::new(backend.clone());
        store.set(&pair("a", "r"), "alice").unwrap();
        backend.remove(&[REFRESH_TOKEN_KEY]).unwrap();

        assert!(store.get().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_entry_is_an_error() {
        let backend = Arc::new(MemoryStore::new());
        let store = TokenStore::new(backend.clone());
        backend
            .store(&[
                (ACCESS_TOKEN_KEY, "plain-string".to_string()),
                (REFRESH_TOKEN_KEY, "plain-string".to_string()),
            ])
            .unwrap();

        assert!(matches!(store.get(), Err(StoreError::Corrupt(key)) if key == ACCESS_TOKEN_KEY));
    }

    #[test]
    fn test_pair_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        let original = pair("access", "refresh");

        TokenStore::new(Arc::new(FileStore::open(&path).unwrap()))
            .set(&original, "alice@example.com")
            .unwrap();

        let reloaded = TokenStore::new(Arc::new(FileStore::open(&path).unwrap()));
        assert_eq!(reloaded.get().unwrap(), Some(original));
        assert_eq!(
            reloaded.current_subject().unwrap().as_deref(),
            Some("alice@example.com")
        );
    }

    #[test]
    fn test_credential_pair_wire_shape() {
        let json = serde_json::json!({
            "accessToken": "a.b.c",
            "accessTokenExpires": "2030-01-01T00:00:00Z",
            "refreshToken": "r.s.t",
            "refreshTokenExpires": "2030-01-08T00:00:00+00:00",
        });
        let pair: CredentialPair = serde_json::from_value(json).unwrap();
        assert_eq!(pair.access_token, "a.b.c");
        assert_eq!(pair.refresh_token, "r.s.t");
        assert!(pair.refresh_token_valid(Utc::now(), 5));
    }

    #[test]
    fn test_refresh_token_validity() {
        let mut p = pair("a", "r");
        assert!(p.refresh_token_valid(Utc::now(), 5));

        p.refresh_token_expires = Utc::now() - Duration::seconds(1);
        assert!(!p.refresh_token_valid(Utc::now(), 0));

        let mut empty = pair("a", "");
        empty.refresh_token_expires = Utc::now() + Duration::days(1);
        assert!(!empty.refresh_token_valid(Utc::now(), 0));
    }
}
