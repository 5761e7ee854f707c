//! CLI subcommands.

pub mod catalog;
pub mod migrate;

use secrecy::SecretString;
use sqlx::PgPool;

use freshmart_storefront::db;

/// Errors shared by every command that needs the database.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Connect to the shop database named by `STOREFRONT_DATABASE_URL`.
///
/// # Errors
///
/// Returns an error if the variable is unset or the database is unreachable.
pub async fn connect() -> Result<PgPool, ConnectError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("STOREFRONT_DATABASE_URL")
        .map(SecretString::from)
        .map_err(|_| ConnectError::MissingEnvVar("STOREFRONT_DATABASE_URL"))?;

    tracing::info!("Connecting to shop database...");
    Ok(db::create_pool(&database_url).await?)
}
