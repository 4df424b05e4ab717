//! CLI command implementations.

pub mod cache;
pub mod init;
pub mod migrate;
pub mod run;

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::adapters::sqlite::{
    initialize_database, PoolConfig, SqliteArtifactRepository, SqliteRunRepository,
};
use crate::domain::models::Config;
use crate::services::RunService;

pub type SqliteRunService = RunService<SqliteRunRepository, SqliteArtifactRepository>;

/// Open the configured database and build the run service on it.
pub async fn open_service(config: &Config) -> Result<(SqlitePool, SqliteRunService)> {
    let pool = initialize_database(&config.database.url(), Some(PoolConfig::from(&config.database)))
        .await
        .context("Failed to open database. Run 'customer-intel init' first.")?;

    let service = RunService::with_cache_config(
        Arc::new(SqliteRunRepository::new(pool.clone())),
        Arc::new(SqliteArtifactRepository::new(pool.clone())),
        &config.cache,
    );
    Ok((pool, service))
}
