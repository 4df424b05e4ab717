//! Implementation of the `customer-intel init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::fs;

use crate::adapters::sqlite::{initialize_database, PoolConfig};
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::CONFIG_DIR;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Rewrite config.yaml even if the project is already initialized
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub initialized_path: PathBuf,
    pub directories_created: Vec<String>,
    pub config_written: bool,
    pub database_path: PathBuf,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if !self.directories_created.is_empty() {
            lines.push("\nCreated directories:".to_string());
            for dir in &self.directories_created {
                lines.push(format!("  - {dir}"));
            }
        }
        if self.config_written {
            lines.push(format!("\nWrote {CONFIG_DIR}/config.yaml"));
        }
        if self.success {
            lines.push(format!("Database ready at {}", self.database_path.display()));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let target_path = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir().context("Failed to get current directory")?.join(&args.path)
    };

    let project_dir = target_path.join(CONFIG_DIR);
    let config_path = project_dir.join("config.yaml");
    let defaults = Config::default();
    let database_path = target_path.join(&defaults.database.path);

    if config_path.exists() && !args.force {
        let output_data = InitOutput {
            success: false,
            message: "Project already initialized. Use --force to rewrite the config.".to_string(),
            initialized_path: target_path,
            directories_created: vec![],
            config_written: false,
            database_path,
        };
        output(&output_data, json_mode);
        return Ok(());
    }

    let mut directories_created = vec![];
    for dir in [project_dir.clone(), project_dir.join("logs")] {
        if !dir.exists() {
            fs::create_dir_all(&dir).await.with_context(|| format!("Failed to create {}", dir.display()))?;
            let relative = dir.strip_prefix(&target_path).unwrap_or(&dir).to_string_lossy().to_string();
            directories_created.push(relative);
        }
    }

    let yaml = serde_yaml::to_string(&defaults).context("Failed to render default config")?;
    fs::write(&config_path, yaml)
        .await
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    // Existing data is kept; init only brings the schema up to date.
    let db_url = format!("sqlite:{}", database_path.display());
    initialize_database(&db_url, Some(PoolConfig::from(&defaults.database)))
        .await
        .context("Failed to initialize database")?;

    let output_data = InitOutput {
        success: true,
        message: if args.force {
            "Project reinitialized successfully.".to_string()
        } else {
            "Project initialized successfully.".to_string()
        },
        initialized_path: target_path,
        directories_created,
        config_written: true,
        database_path,
    };
    output(&output_data, json_mode);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::ConfigLoader;

    #[tokio::test]
    async fn test_init_creates_loadable_project() {
        let dir = tempfile::tempdir().unwrap();
        let args = InitArgs { force: false, path: dir.path().to_path_buf() };

        execute(args, true).await.unwrap();

        let project = dir.path().join(CONFIG_DIR);
        assert!(project.join("config.yaml").exists());
        assert!(project.join("logs").is_dir());
        assert!(project.join("customer-intel.db").exists());

        let config = ConfigLoader::load_from_file(project.join("config.yaml")).unwrap();
        assert_eq!(config.database.path, Config::default().database.path);
    }

    #[tokio::test]
    async fn test_init_twice_keeps_config() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_DIR).join("config.yaml");

        execute(InitArgs { force: false, path: dir.path().to_path_buf() }, true).await.unwrap();
        std::fs::write(&config_path, "cache:\n  max_lineage_depth: 2\n").unwrap();

        execute(InitArgs { force: false, path: dir.path().to_path_buf() }, true).await.unwrap();
        let config = ConfigLoader::load_from_file(&config_path).unwrap();
        assert_eq!(config.cache.max_lineage_depth, 2);
    }
}
