//! Signed account-activation tokens.
//!
//! HS256 JWTs signed with the session secret. The only claim that matters is
//! `confirm`, the id of the account to activate.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use freshmart_core::UserId;

/// How long an activation link stays valid.
pub const ACTIVATION_TTL: Duration = Duration::hours(1);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("token signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct ActivationClaims {
    confirm: i32,
    exp: i64,
    iat: i64,
}

/// Issues and verifies activation tokens.
#[derive(Clone)]
pub struct ActivationTokens {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl ActivationTokens {
    #[must_use]
    pub fn new(secret: &SecretString) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(bytes),
            decoding_key: DecodingKey::from_secret(bytes),
            ttl: ACTIVATION_TTL,
        }
    }

    /// Token confirming `user_id`, valid for [`ACTIVATION_TTL`].
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Signing` if encoding fails.
    pub fn issue(&self, user_id: UserId) -> Result<String, TokenError> {
        self.issue_at(user_id, Utc::now())
    }

    fn issue_at(&self, user_id: UserId, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = ActivationClaims {
            confirm: user_id.as_i32(),
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Check the signature and expiry, returning the account to activate.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Expired` for a well-signed but stale token and
    /// `TokenError::Invalid` for anything else.
    pub fn verify(&self, token: &str) -> Result<UserId, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<ActivationClaims>(token, &self.decoding_key, &validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            },
        )?;
        Ok(UserId::new(data.claims.confirm))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tokens(secret: &str) -> ActivationTokens {
        ActivationTokens::new(&SecretString::from(secret.to_string()))
    }

    #[test]
    fn test_issue_then_verify() {
        let tokens = tokens("k7Hq2mZpX9vR4tLw8NcY3bJfD6sGaE1u");
        let token = tokens.issue(UserId::new(42)).unwrap();
        assert_eq!(tokens.verify(&token).unwrap(), UserId::new(42));
    }

    #[test]
    fn test_expired_token() {
        let tokens = tokens("k7Hq2mZpX9vR4tLw8NcY3bJfD6sGaE1u");
        let two_hours_ago = Utc::now() - Duration::hours(2);
        let token = tokens.issue_at(UserId::new(42), two_hours_ago).unwrap();
        assert_eq!(tokens.verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = tokens("k7Hq2mZpX9vR4tLw8NcY3bJfD6sGaE1u")
            .issue(UserId::new(42))
            .unwrap();
        let other = tokens("Zq8Wm3Np6Rt1Vx4Bc7Df0Gh2Jk5Lm9Pa");
        assert!(matches!(other.verify(&token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_garbage_is_invalid() {
        let tokens = tokens("k7Hq2mZpX9vR4tLw8NcY3bJfD6sGaE1u");
        assert!(matches!(tokens.verify("not-a-token"), Err(TokenError::Invalid(_))));
    }
}
