//! Command-line interface.

pub mod commands;
pub mod id_resolver;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::cache::CacheArgs;
use commands::init::InitArgs;
use commands::run::RunArgs;

#[derive(Parser, Debug)]
#[command(name = "customer-intel")]
#[command(about = "CustomerIntel run lineage cache and status tracking", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Read configuration from this file instead of .customer-intel/
    #[arg(short, long, global = true, env = "CUSTOMER_INTEL_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the project directory, config file and database
    Init(InitArgs),

    /// Apply pending database migrations
    Migrate,

    /// Run lifecycle commands
    Run(RunArgs),

    /// Cached artifact commands
    Cache(CacheArgs),
}

/// Print an error and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "causes": chain,
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err}");
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
    }
    std::process::exit(1);
}
