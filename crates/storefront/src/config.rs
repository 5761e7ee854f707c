//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `STOREFRONT_BASE_URL` - Public URL for the storefront, used in activation links
//! - `STOREFRONT_SESSION_SECRET` - Session and activation-token signing secret
//!   (min 32 chars, high entropy)
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `STOREFRONT_REDIS_URL` - Cart and history store (default: `redis://127.0.0.1:6379/0`)
//! - `STOREFRONT_STATIC_DIR` - Static assets and generated homepage (default: `crates/storefront/static`)
//! - `STOREFRONT_SHIPPING_FEE` - Flat shipping fee per order (default: 10)
//! - `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD`, `EMAIL_FROM` - Outgoing mail.
//!   When `SMTP_HOST` is unset, activation links are logged instead of sent.
//! - `ALIPAY_APP_ID`, `ALIPAY_PRIVATE_KEY_PATH`, `ALIPAY_PUBLIC_KEY_PATH` - Payment
//!   gateway credentials and the key that verifies gateway replies. All or none
//!   must be set.
//! - `ALIPAY_GATEWAY_URL` - Gateway endpoint (default: sandbox)
//! - `PAYMENT_POLL_INTERVAL_SECS` - Delay between trade queries (default: 5)
//! - `PAYMENT_POLL_DEADLINE_SECS` - Give up waiting for payment after this long (default: 120)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use freshmart_core::Money;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

const MIN_SESSION_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

const DEFAULT_ALIPAY_GATEWAY: &str = "https://openapi.alipaydev.com/gateway.do";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// Redis URL for carts and browsing history
    pub redis_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront
    pub base_url: String,
    /// Session and activation-token signing secret
    pub session_secret: SecretString,
    /// Directory served at `/static`; the generated homepage is written here
    pub static_dir: PathBuf,
    /// Flat shipping fee added to every order
    pub shipping_fee: Money,
    /// Outgoing mail, if configured
    pub smtp: Option<SmtpConfig>,
    /// Payment gateway credentials, if configured
    pub alipay: Option<AlipayConfig>,
    /// Payment status polling bounds
    pub payment_poll: PaymentPollConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// SMTP settings for activation emails.
///
/// Implements `Debug` manually to redact the password.
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from: String,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("from", &self.from)
            .finish()
    }
}

/// Alipay open-platform credentials.
#[derive(Debug, Clone)]
pub struct AlipayConfig {
    pub app_id: String,
    /// PEM file holding the merchant's RSA private key
    pub private_key_path: PathBuf,
    /// PEM file holding Alipay's RSA public key
    pub alipay_public_key_path: PathBuf,
    pub gateway_url: String,
}

/// Bounds for the payment status poll.
#[derive(Debug, Clone, Copy)]
pub struct PaymentPollConfig {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for PaymentPollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            deadline: Duration::from_secs(120),
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("STOREFRONT_DATABASE_URL")?;
        let redis_url = SecretString::from(get_env_or_default(
            "STOREFRONT_REDIS_URL",
            "redis://127.0.0.1:6379/0",
        ));
        let host = parse_env("STOREFRONT_HOST", "127.0.0.1")?;
        let port = parse_env("STOREFRONT_PORT", "3000")?;
        let base_url = get_required_env("STOREFRONT_BASE_URL")?;
        let session_secret = get_validated_secret("STOREFRONT_SESSION_SECRET")?;
        validate_session_secret(&session_secret, "STOREFRONT_SESSION_SECRET")?;

        let static_dir = PathBuf::from(get_env_or_default(
            "STOREFRONT_STATIC_DIR",
            "crates/storefront/static",
        ));
        let shipping_fee = Money::from_units(parse_env("STOREFRONT_SHIPPING_FEE", "10")?);

        let smtp = SmtpConfig::from_env()?;
        let alipay = AlipayConfig::from_env()?;
        let payment_poll = PaymentPollConfig {
            interval: Duration::from_secs(parse_env("PAYMENT_POLL_INTERVAL_SECS", "5")?),
            deadline: Duration::from_secs(parse_env("PAYMENT_POLL_DEADLINE_SECS", "120")?),
        };

        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");

        Ok(Self {
            database_url,
            redis_url,
            host,
            port,
            base_url,
            session_secret,
            static_dir,
            shipping_fee,
            smtp,
            alipay,
            payment_poll,
            sentry_dsn,
            sentry_environment,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether cookies should carry the `Secure` flag.
    #[must_use]
    pub fn is_https(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

impl SmtpConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(host) = get_optional_env("SMTP_HOST") else {
            return Ok(None);
        };

        Ok(Some(Self {
            host,
            port: parse_env("SMTP_PORT", "587")?,
            username: get_required_env("SMTP_USERNAME")?,
            password: get_required_secret("SMTP_PASSWORD")?,
            from: get_required_env("EMAIL_FROM")?,
        }))
    }
}

impl AlipayConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_parts(
            get_optional_env("ALIPAY_APP_ID"),
            get_optional_env("ALIPAY_PRIVATE_KEY_PATH"),
            get_optional_env("ALIPAY_PUBLIC_KEY_PATH"),
            get_env_or_default("ALIPAY_GATEWAY_URL", DEFAULT_ALIPAY_GATEWAY),
        )
    }

    fn from_parts(
        app_id: Option<String>,
        private_key_path: Option<String>,
        alipay_public_key_path: Option<String>,
        gateway_url: String,
    ) -> Result<Option<Self>, ConfigError> {
        match (app_id, private_key_path, alipay_public_key_path) {
            (None, None, None) => Ok(None),
            (Some(app_id), Some(private_key), Some(public_key)) => Ok(Some(Self {
                app_id,
                private_key_path: PathBuf::from(private_key),
                alipay_public_key_path: PathBuf::from(public_key),
                gateway_url,
            })),
            (app_id, private_key, _) => {
                let missing = if app_id.is_none() {
                    "ALIPAY_APP_ID"
                } else if private_key.is_none() {
                    "ALIPAY_PRIVATE_KEY_PATH"
                } else {
                    "ALIPAY_PUBLIC_KEY_PATH"
                };
                Err(ConfigError::MissingEnvVar(missing.to_string()))
            }
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Validate that a session secret meets minimum length requirements.
fn validate_session_secret(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_SESSION_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_SESSION_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)]
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

/// Configuration for unit tests; nothing in it is reachable.
#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) fn test_config() -> StorefrontConfig {
    StorefrontConfig {
        database_url: SecretString::from("postgres://localhost/test"),
        redis_url: SecretString::from("redis://127.0.0.1:6379/0"),
        host: "127.0.0.1".parse().unwrap(),
        port: 3000,
        base_url: "http://localhost:3000".to_string(),
        session_secret: SecretString::from("x".repeat(32)),
        static_dir: PathBuf::from("static"),
        shipping_fee: Money::from_units(10),
        smtp: None,
        alipay: None,
        payment_poll: PaymentPollConfig::default(),
        sentry_dsn: None,
        sentry_environment: None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_single_char() {
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("your-session-key-here", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_valid() {
        let result = validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR");
        assert!(result.is_ok());
    }

    #[test]
    fn test_validate_session_secret_too_short() {
        let secret = SecretString::from("short");
        assert!(validate_session_secret(&secret, "TEST_SESSION").is_err());
    }

    #[test]
    fn test_socket_addr() {
        let addr = test_config().socket_addr();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 3000);
    }

    #[test]
    fn test_is_https() {
        let mut config = test_config();
        assert!(!config.is_https());
        config.base_url = "https://shop.example.com".to_string();
        assert!(config.is_https());
    }

    #[test]
    fn test_poll_defaults() {
        let poll = PaymentPollConfig::default();
        assert_eq!(poll.interval, Duration::from_secs(5));
        assert_eq!(poll.deadline, Duration::from_secs(120));
    }

    #[test]
    fn test_smtp_debug_redacts_password() {
        let smtp = SmtpConfig {
            host: "smtp.mail.test".to_string(),
            port: 587,
            username: "mailer".to_string(),
            password: SecretString::from("hunter2-smtp-pass"),
            from: "shop@mail.test".to_string(),
        };

        let debug_output = format!("{smtp:?}");
        assert!(debug_output.contains("smtp.mail.test"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("hunter2-smtp-pass"));
    }

    #[test]
    fn test_alipay_config_all_or_none() {
        let some = |v: &str| Some(v.to_string());
        let gateway = || DEFAULT_ALIPAY_GATEWAY.to_string();

        assert!(
            AlipayConfig::from_parts(None, None, None, gateway())
                .unwrap()
                .is_none()
        );

        let config = AlipayConfig::from_parts(
            some("2021000000000000"),
            some("keys/app.pem"),
            some("keys/alipay.pem"),
            gateway(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(config.alipay_public_key_path, PathBuf::from("keys/alipay.pem"));

        let missing = AlipayConfig::from_parts(
            some("2021000000000000"),
            some("keys/app.pem"),
            None,
            gateway(),
        )
        .unwrap_err();
        assert!(
            matches!(missing, ConfigError::MissingEnvVar(ref v) if v == "ALIPAY_PUBLIC_KEY_PATH")
        );

        let missing = AlipayConfig::from_parts(None, None, some("keys/alipay.pem"), gateway())
            .unwrap_err();
        assert!(matches!(missing, ConfigError::MissingEnvVar(ref v) if v == "ALIPAY_APP_ID"));
    }
}
