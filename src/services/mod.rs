//! Application services.

pub mod cache_reuse;
pub mod run_service;

pub use cache_reuse::CacheReusePolicy;
pub use run_service::{CacheInspection, CategoryInspection, RunService, RunStatusView};
