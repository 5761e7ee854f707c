//! Authentication service.
//!
//! Username/password accounts that must be activated through an emailed link
//! before they can log in.

mod error;

pub use error::AuthError;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use sqlx::PgPool;

use freshmart_core::Email;

use crate::db::RepositoryError;
use crate::db::users::UserRepository;
use crate::models::User;
use crate::services::tokens::ActivationTokens;

/// Fields of the registration form.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub email: String,
    /// The "I agree" checkbox; browsers send `on` when ticked.
    pub allow: Option<String>,
}

/// Authentication service.
pub struct AuthService<'a> {
    users: UserRepository<'a>,
    tokens: &'a ActivationTokens,
}

impl<'a> AuthService<'a> {
    /// Create a new authentication service.
    #[must_use]
    pub const fn new(pool: &'a PgPool, tokens: &'a ActivationTokens) -> Self {
        Self {
            users: UserRepository::new(pool),
            tokens,
        }
    }

    /// Register an inactive account and issue its activation token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::MissingFields`, `AuthError::InvalidEmail` or
    /// `AuthError::TermsNotAccepted` for bad form input, checked in that order.
    /// Returns `AuthError::UserAlreadyExists` if the username is taken.
    pub async fn register(&self, form: &Registration) -> Result<(User, String), AuthError> {
        let username = form.username.trim();
        let email = form.email.trim();
        if username.is_empty() || form.password.is_empty() || email.is_empty() {
            return Err(AuthError::MissingFields);
        }

        let email = Email::parse(email)?;

        if form.allow.as_deref() != Some("on") {
            return Err(AuthError::TermsNotAccepted);
        }

        if self.users.username_exists(username).await? {
            return Err(AuthError::UserAlreadyExists);
        }

        let password_hash = hash_password(&form.password)?;

        // A concurrent registration can still win between the check and the insert
        let user = self
            .users
            .create(username, &email, &password_hash)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => AuthError::UserAlreadyExists,
                other => AuthError::Repository(other),
            })?;

        let token = self.tokens.issue(user.id)?;

        Ok((user, token))
    }

    /// Activate the account named by an activation token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::TokenExpired` or `AuthError::InvalidToken` if the
    /// token doesn't verify, and `AuthError::InvalidToken` if the account is gone.
    pub async fn activate(&self, token: &str) -> Result<User, AuthError> {
        let user_id = self.tokens.verify(token)?;

        match self.users.activate(user_id).await {
            Ok(()) => {}
            Err(RepositoryError::NotFound) => return Err(AuthError::InvalidToken),
            Err(other) => return Err(other.into()),
        }

        self.users
            .get_by_id(user_id)
            .await?
            .ok_or(AuthError::InvalidToken)
    }

    /// Check a username and password.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::MissingFields` if either field is empty.
    /// Returns `AuthError::InvalidCredentials` if the username/password is wrong.
    /// Returns `AuthError::Inactive` if the account has not been activated.
    pub async fn login(&self, username: &str, password: &str) -> Result<User, AuthError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::MissingFields);
        }

        let (user, password_hash) = self
            .users
            .get_with_password_hash(username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        verify_password(password, &password_hash)?;

        if !user.is_active {
            return Err(AuthError::Inactive);
        }

        Ok(user)
    }
}

/// Hash a password using Argon2id.
fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::PasswordHash)
}

/// Verify a password against a hash.
fn verify_password(password: &str, hash: &str) -> Result<(), AuthError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::InvalidCredentials)?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AuthError::InvalidCredentials)
}

/// Redirect target after login: only same-site paths are honored.
#[must_use]
pub fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => {
            path
        }
        _ => "/",
    }
}
