//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! as-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `SERVER_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)

use secrecy::SecretString;
use thiserror::Error;

use super::env_var;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Apply pending order database migrations.
///
/// # Errors
///
/// Returns `MigrationError` if no database URL is configured, the connection
/// fails, or a migration fails.
pub async fn run() -> Result<(), MigrationError> {
    let database_url = env_var("SERVER_DATABASE_URL")
        .or_else(|| env_var("DATABASE_URL"))
        .map(SecretString::from)
        .ok_or(MigrationError::MissingEnvVar("SERVER_DATABASE_URL"))?;

    tracing::info!("Connecting to database...");
    let pool = apple_store_server::db::create_pool(&database_url).await?;

    tracing::info!("Running migrations...");
    apple_store_server::db::run_migrations(&pool).await?;
    pool.close().await;

    tracing::info!("Migrations complete");
    Ok(())
}
