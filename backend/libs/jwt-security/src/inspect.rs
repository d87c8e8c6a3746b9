//! Credential inspection without signature verification

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use thiserror::Error;
use tracing::debug;

use crate::Claims;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Malformed credential: {0}")]
    Malformed(String),
}

/// What the inspector can tell about a credential locally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Valid { expires_at: DateTime<Utc> },
    Expired { expired_at: DateTime<Utc> },
    Malformed,
}

impl CredentialState {
    /// Expired and malformed credentials both need re-authentication
    pub fn needs_refresh(&self) -> bool {
        !matches!(self, CredentialState::Valid { .. })
    }
}

/// Decode the payload of a bearer credential
///
/// Reads claims only. Signature, audience and expiry are not validated.
pub fn decode_unverified(token: &str) -> Result<Claims, CredentialError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| CredentialError::Malformed(e.to_string()))
}

/// Inspect a credential against `now`, treating it as expired `leeway` early
pub fn inspect(token: &str, now: DateTime<Utc>, leeway: Duration) -> CredentialState {
    let claims = match decode_unverified(token) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "Credential could not be decoded");
            return CredentialState::Malformed;
        }
    };

    let Some(expires_at) = Utc.timestamp_opt(claims.exp, 0).single() else {
        return CredentialState::Malformed;
    };

    if expires_at <= now + leeway {
        CredentialState::Expired {
            expired_at: expires_at,
        }
    } else {
        CredentialState::Valid { expires_at }
    }
}

/// `true` when the credential is expired or cannot be decoded
pub fn is_expired(token: &str, now: DateTime<Utc>, leeway: Duration) -> bool {
    inspect(token, now, leeway).needs_refresh()
}
