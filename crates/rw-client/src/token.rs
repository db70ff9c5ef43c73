//! Bearer tokens and their embedded expiry.
//!
//! Tokens are JWTs whose signature is checked by the backend, not here. The
//! client only reads the `exp` claim out of the payload segment to decide
//! whether the token is worth sending. Anything that cannot be read is
//! reported as [`TokenExpiry::Malformed`], which counts as expired.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::error::DecodeError;

/// Opaque bearer credential
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Token(String);

/// Claims the client cares about
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Claims {
    /// Expiry in seconds since the epoch; JWT allows fractional values
    pub exp: f64,
    /// Subject as issued; backends use both string and numeric ids
    #[serde(default)]
    pub sub: Option<serde_json::Value>,
}

/// Outcome of reading a token's expiry
#[derive(Debug, Clone, PartialEq)]
pub enum TokenExpiry {
    Expires(DateTime<Utc>),
    Malformed(DecodeError),
}

impl TokenExpiry {
    /// Expired at `now`, failing closed for malformed tokens
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            TokenExpiry::Expires(at) => now >= *at,
            TokenExpiry::Malformed(_) => true,
        }
    }
}

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Decode the payload segment
    pub fn claims(&self) -> Result<Claims, DecodeError> {
        let payload = self
            .0
            .split('.')
            .nth(1)
            .filter(|segment| !segment.is_empty())
            .ok_or(DecodeError::MissingPayload)?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| DecodeError::Base64(e.to_string()))?;

        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| DecodeError::Json(e.to_string()))?;

        if !value.get("exp").is_some_and(serde_json::Value::is_number) {
            return Err(DecodeError::MissingExpiry);
        }

        serde_json::from_value(value).map_err(|e| DecodeError::Json(e.to_string()))
    }

    /// Read the expiry without failing
    pub fn expiry(&self) -> TokenExpiry {
        match self.claims() {
            Ok(claims) => match expiry_instant(claims.exp) {
                Some(at) => TokenExpiry::Expires(at),
                None => TokenExpiry::Malformed(DecodeError::MissingExpiry),
            },
            Err(e) => TokenExpiry::Malformed(e),
        }
    }

    /// True if the current time is at or past `exp`, or the token is malformed
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry().is_expired_at(now)
    }

    /// Like [`is_expired`](Self::is_expired) but treats tokens that expire
    /// within `leeway` as already expired
    pub fn is_expired_with_leeway(&self, leeway: Duration) -> bool {
        match Utc::now().checked_add_signed(leeway) {
            Some(at) => self.is_expired_at(at),
            None => true,
        }
    }
}

/// `exp` seconds to an instant at millisecond precision
fn expiry_instant(exp: f64) -> Option<DateTime<Utc>> {
    if !exp.is_finite() {
        return None;
    }
    let millis = (exp * 1000.0).floor();
    if millis < i64::MIN as f64 || millis > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_millis(millis as i64)
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
