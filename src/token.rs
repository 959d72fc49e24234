//! Session token freshness checks
//!
//! A session token is the standard base64 encoding of `"{issued_at_ms}-{nonce}"`.
//! Tokens carry no server-side state and there is no revocation; the only
//! property checked is that the embedded timestamp is recent. Anyone can mint
//! one, so a valid token is a deterrent signal and nothing more.

use crate::config::TokenConfig;
use crate::error::{Result, ShieldError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Decoded session token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub issued_at_ms: i64,
    pub nonce: String,
}

impl SessionToken {
    /// Encode a token the way a legitimate client mints it
    pub fn mint(issued_at_ms: u64, nonce: &str) -> String {
        STANDARD.encode(format!("{}-{}", issued_at_ms, nonce))
    }

    /// Decode a token into its timestamp and nonce
    ///
    /// # Errors
    /// `ParseError` when the token is not base64, not UTF-8, has fewer than
    /// two dash-separated fields, or the timestamp field is not an integer.
    pub fn decode(token: &str) -> Result<Self> {
        let raw = STANDARD
            .decode(token.trim())
            .map_err(|e| ShieldError::ParseError(format!("token is not base64: {}", e)))?;
        let payload = String::from_utf8(raw)
            .map_err(|e| ShieldError::ParseError(format!("token is not UTF-8: {}", e)))?;

        let (timestamp, nonce) = payload.split_once('-').ok_or_else(|| {
            ShieldError::ParseError("token payload has fewer than 2 fields".to_string())
        })?;

        let issued_at_ms = timestamp.trim().parse::<i64>().map_err(|e| {
            ShieldError::ParseError(format!("token timestamp '{}' is invalid: {}", timestamp, e))
        })?;

        Ok(SessionToken {
            issued_at_ms,
            nonce: nonce.to_string(),
        })
    }
}

/// Decides whether a session token is well-formed and fresh
#[derive(Debug, Clone)]
pub struct TokenValidator {
    max_age_ms: u64,
    clock_skew_ms: u64,
}

impl TokenValidator {
    pub fn new(config: &TokenConfig) -> Self {
        TokenValidator {
            max_age_ms: config.max_age_ms,
            clock_skew_ms: config.clock_skew_ms,
        }
    }

    /// Returns true iff the token decodes and `-skew <= now - issued_at < max_age`.
    ///
    /// Fails closed on a missing or malformed token.
    pub fn validate(&self, token: Option<&str>, now_ms: u64) -> bool {
        let Some(token) = token.filter(|t| !t.trim().is_empty()) else {
            return false;
        };

        let decoded = match SessionToken::decode(token) {
            Ok(decoded) => decoded,
            Err(_) => return false,
        };

        let age = now_ms as i128 - decoded.issued_at_ms as i128;
        age < self.max_age_ms as i128 && age >= -(self.clock_skew_ms as i128)
    }
}

impl Default for TokenValidator {
    fn default() -> Self {
        Self::new(&TokenConfig::default())
    }
}
