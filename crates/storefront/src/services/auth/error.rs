//! Authentication error types.

use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::tokens::TokenError;

/// Errors that can occur during registration, activation and login.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A required form field was empty.
    #[error("missing required fields")]
    MissingFields,

    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] freshmart_core::EmailError),

    /// The terms checkbox was not ticked.
    #[error("terms not accepted")]
    TermsNotAccepted,

    /// Username already taken.
    #[error("user already exists")]
    UserAlreadyExists,

    /// Invalid credentials (wrong password or user not found).
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Correct password, but the activation link was never followed.
    #[error("account not activated")]
    Inactive,

    /// Activation token failed verification.
    #[error("invalid activation token")]
    InvalidToken,

    /// Activation token was valid but is past its expiry.
    #[error("activation link expired")]
    TokenExpired,

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),

    /// Password hashing error.
    #[error("password hashing error")]
    PasswordHash,

    /// Activation token could not be signed.
    #[error("token signing error: {0}")]
    TokenSigning(String),
}

impl AuthError {
    /// Message shown on the form that was submitted.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::MissingFields => "Please fill in every field",
            Self::InvalidEmail(_) => "The email address is not valid",
            Self::TermsNotAccepted => "Please accept the user agreement",
            Self::UserAlreadyExists => "That username is already taken",
            Self::InvalidCredentials => "Wrong username or password",
            Self::Inactive => "Account not activated",
            Self::InvalidToken => "Invalid activation link",
            Self::TokenExpired => "Activation link expired",
            Self::Repository(_) | Self::PasswordHash | Self::TokenSigning(_) => {
                "Something went wrong, please try again"
            }
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => Self::TokenExpired,
            TokenError::Invalid(_) => Self::InvalidToken,
            TokenError::Signing(msg) => Self::TokenSigning(msg),
        }
    }
}
