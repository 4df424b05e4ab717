//! customer-intel - run lineage cache for the CustomerIntel research pipeline
//!
//! Stores the artifacts a company-research run produces, decides whether a
//! new run may reuse a prior run's artifacts, and guards run status
//! transitions.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and repository ports
//! - **Adapters** (`adapters`): SQLite implementations of the ports
//! - **Service Layer** (`services`): reuse policy and run use cases
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use customer_intel::adapters::sqlite::{initialize_database, SqliteArtifactRepository, SqliteRunRepository};
//! use customer_intel::domain::models::{CompanyPair, RefreshConfig};
//! use customer_intel::services::RunService;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = initialize_database("sqlite:cache.db", None).await?;
//!     let service = RunService::new(
//!         Arc::new(SqliteRunRepository::new(pool.clone())),
//!         Arc::new(SqliteArtifactRepository::new(pool)),
//!     );
//!     let run = service.create_run(CompanyPair::new(1, Some(2)), RefreshConfig::default(), None).await?;
//!     println!("reuses {:?}", run.reused_from_run_id);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    ArtifactCategory, CompanyPair, Config, ForceFailOutcome, RefreshConfig, ReuseDecision, Run,
    RunStatus,
};
pub use domain::ports::{ArtifactRepository, RunFilter, RunRepository};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{CacheReusePolicy, RunService};
