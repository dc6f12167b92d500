//! PostgreSQL persistence for imagegen.
//!
//! Implements the storage ports from [`imagegen_core::ports`] on top of a
//! `sqlx` pool. With the `test-utils` feature the [`memory`] module exposes
//! in-memory stores with identical transition semantics.

use sqlx::postgres::PgPoolOptions;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod repositories;
pub mod rows;

pub use repositories::{PgProviderConfigStore, PgTaskStore, ProviderConfigRepo, TaskRepo};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Run a trivial query to verify connectivity.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
