//! Implementation of the `customer-intel migrate` command.

use anyhow::{Context, Result};

use crate::adapters::sqlite::{all_embedded_migrations, create_pool, Migrator, PoolConfig};
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

#[derive(Debug, serde::Serialize)]
pub struct MigrateOutput {
    pub database: String,
    pub applied: usize,
    pub version: i64,
}

impl CommandOutput for MigrateOutput {
    fn to_human(&self) -> String {
        if self.applied == 0 {
            format!("Database {} is up to date (version {}).", self.database, self.version)
        } else {
            format!(
                "Applied {} migration(s) to {}; now at version {}.",
                self.applied, self.database, self.version
            )
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(config: &Config, json_mode: bool) -> Result<()> {
    let url = config.database.url();
    let pool = create_pool(&url, Some(PoolConfig::from(&config.database)))
        .await
        .with_context(|| format!("Failed to open database {url}"))?;

    let migrator = Migrator::new(pool);
    let applied = migrator
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .context("Failed to apply migrations")?;
    let version = migrator.get_current_version().await?;

    output(
        &MigrateOutput {
            database: config.database.path.clone(),
            applied,
            version,
        },
        json_mode,
    );
    Ok(())
}
