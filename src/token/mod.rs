//! Bearer token decoding
//!
//! Tokens have the JWT `header.payload.signature` shape. Only the claims are
//! read; the signature is never checked.

mod validator;

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use log::trace;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Error;

pub use validator::{TokenStatus, TokenValidator};

/// Decoded token claims
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Expiry, unix seconds
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub exp: Option<i64>,

    /// Issued-at, unix seconds
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub iat: Option<i64>,

    /// Subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
}

/// NumericDate may carry a fraction; it is truncated to whole seconds
fn numeric_date<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.filter(|v| v.is_finite()).map(|v| v.floor() as i64))
}

impl Claims {
    /// Expiry used for validity and scheduling.
    ///
    /// `exp` when present, otherwise the issue time plus `max_age`. Tokens
    /// carrying neither claim fall back to `issued_fallback` (the login time).
    pub fn effective_expiry(
        &self,
        max_age: Duration,
        issued_fallback: Option<DateTime<Utc>>,
    ) -> Option<i64> {
        if let Some(exp) = self.exp {
            return Some(exp);
        }
        let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        self.iat
            .or_else(|| issued_fallback.map(|ts| ts.timestamp()))
            .map(|issued| issued.saturating_add(max_age))
    }
}

/// Decode a token's claims, or `None` for anything that is not a
/// three-part token with a base64url JSON header and payload. The header's
/// contents (`alg`, `typ`) are not interpreted.
pub fn decode(token: &str) -> Option<Claims> {
    match try_decode(token) {
        Ok(claims) => Some(claims),
        Err(err) => {
            trace!("Token did not decode: {}", err);
            None
        }
    }
}

/// Like [`decode`] but reports why decoding failed
pub fn try_decode(token: &str) -> Result<Claims, Error> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::malformed(format!(
            "expected 3 segments, found {}",
            parts.len()
        )));
    }

    let header = segment(parts[0], "header")?;
    if !serde_json::from_slice::<serde_json::Value>(&header)?.is_object() {
        return Err(Error::malformed("header is not a JSON object"));
    }

    let payload = segment(parts[1], "payload")?;
    Ok(serde_json::from_slice::<Claims>(&payload)?)
}

fn segment(raw: &str, what: &str) -> Result<Vec<u8>, Error> {
    // some issuers keep the padding
    URL_SAFE_NO_PAD
        .decode(raw.trim_end_matches('='))
        .map_err(|err| Error::malformed(format!("{} is not base64url: {}", what, err)))
}
