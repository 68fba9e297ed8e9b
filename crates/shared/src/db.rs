//! Database pool helpers shared by the workspace binaries.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Create the application connection pool. Sized for the worker and an API
/// server sharing one small Postgres instance.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Run the embedded migrations. Called once at startup, before any job is
/// scheduled.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations");
    sqlx::migrate!("../../migrations").run(pool).await?;
    tracing::info!("Database migrations complete");
    Ok(())
}
