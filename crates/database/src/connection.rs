use crate::error::DbError;
use configuration::StoreConfig;
use dotenvy::dotenv;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::env;
use std::time::Duration;

/// Establishes a connection pool to the PostgreSQL database.
///
/// The connection string is read from the environment variable named by
/// `config.database_url_env`, after loading a `.env` file if one exists.
/// Connections return to the pool when their guard drops, on every exit path.
pub async fn connect(config: &StoreConfig) -> Result<PgPool, DbError> {
    // A missing .env file is fine; the variable may come from the real environment.
    dotenv().ok();

    let database_url = env::var(&config.database_url_env).map_err(|_e| {
        DbError::ConnectionConfigError(format!("{} must be set.", config.database_url_env))
    })?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&database_url)
        .await?;

    tracing::info!(max_connections = config.max_connections, "connected to state store");
    Ok(pool)
}

/// A utility function to run database migrations automatically.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    // Use a relative path from the crate root
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
