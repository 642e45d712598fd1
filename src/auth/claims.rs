//! Access token claims decoding
//!
//! Parses the payload segment of a `header.payload.signature` token. The
//! signature is not checked here: the client only uses claims to decide what
//! to show, and the API enforces authorization on every call.

use std::collections::BTreeSet;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use serde::de;
use serde::Deserialize;

use super::SessionError;

fn string_or_i64<'de, D: de::Deserializer<'de>>(d: D) -> std::result::Result<i64, D::Error> {
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = i64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("epoch seconds as a number or numeric string")
        }
        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<i64, E> {
            Ok(v)
        }
        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<i64, E> {
            i64::try_from(v).map_err(E::custom)
        }
        fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<i64, E> {
            Ok(v.trunc() as i64)
        }
        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<i64, E> {
            v.trim().parse().map_err(E::custom)
        }
    }
    d.deserialize_any(Visitor)
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    sub: String,
    #[serde(deserialize_with = "string_or_i64")]
    exp: i64,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    roles: Option<Vec<String>>,
    #[serde(default)]
    scopes: Option<Vec<String>>,
}

/// Identity and authorization data carried by an access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub subject: String,
    /// Epoch seconds
    pub expires_at: i64,
    pub roles: BTreeSet<String>,
    pub scopes: BTreeSet<String>,
    pub client_id: Option<String>,
}

impl Claims {
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.expires_at, 0).single()
    }

    /// Expired if fewer than `skew_secs` remain before `exp`.
    pub fn is_expired(&self, now: DateTime<Utc>, skew_secs: u64) -> bool {
        let skew = i64::try_from(skew_secs).unwrap_or(i64::MAX);
        now.timestamp().saturating_add(skew) >= self.expires_at
    }
}

/// Decode the claims of `token` without verifying its signature.
pub fn decode(token: &str) -> Result<Claims, SessionError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(SessionError::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let payload = segments[1].trim_end_matches('=');
    if payload.is_empty() {
        return Err(SessionError::MalformedToken(
            "empty payload segment".to_string(),
        ));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| SessionError::MalformedToken(format!("payload is not base64url: {}", e)))?;

    let raw: RawClaims = serde_json::from_slice(&bytes)
        .map_err(|e| SessionError::MalformedToken(format!("payload is not valid claims: {}", e)))?;

    Ok(Claims {
        subject: raw.sub,
        expires_at: raw.exp,
        roles: raw.roles.unwrap_or_default().into_iter().collect(),
        scopes: raw.scopes.unwrap_or_default().into_iter().collect(),
        client_id: raw.client_id,
    })
}
