//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces that persistence adapters implement:
//! - RunRepository: run records, lineage selection and status writes
//! - ArtifactRepository: cached NB and synthesis results

pub mod artifact_repository;
pub mod run_repository;

pub use artifact_repository::ArtifactRepository;
pub use run_repository::{ReuseResolver, RunFilter, RunRepository};
