//! customer-intel CLI entry point.

use anyhow::Result;
use clap::Parser;

use customer_intel::cli::{commands, handle_error, Cli, Commands};
use customer_intel::domain::models::Config;
use customer_intel::infrastructure::config::ConfigLoader;
use customer_intel::infrastructure::logging::{LogConfig, LoggerImpl};

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => handle_error(err, json),
    };

    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, json),
    };

    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args, json).await,
        Commands::Migrate => commands::migrate::execute(&config, json).await,
        Commands::Run(args) => commands::run::execute(args, &config, json).await,
        Commands::Cache(args) => commands::cache::execute(args, &config, json).await,
    };

    if let Err(err) = result {
        handle_error(err, json);
    }
}
