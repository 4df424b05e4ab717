//! Artifact repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ArtifactCounts, NbResult, NotebookCode, StoredNbResult, StoredSynthesis, SynthesisRecord,
};

/// Repository interface for cached NB and synthesis artifacts.
///
/// Reads return rows undecoded; callers decide whether a payload that fails
/// validation is an error or just a missing artifact.
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Insert or replace the NB result for `(run_id, code)`.
    async fn upsert_nb_result(&self, result: &NbResult) -> DomainResult<()>;

    /// Get one NB result.
    async fn get_nb_result(&self, run_id: Uuid, code: NotebookCode) -> DomainResult<Option<StoredNbResult>>;

    /// All NB results of a run, ordered by notebook code.
    async fn list_nb_results(&self, run_id: Uuid) -> DomainResult<Vec<StoredNbResult>>;

    /// Insert or replace the synthesis record of a run.
    async fn upsert_synthesis(&self, record: &SynthesisRecord) -> DomainResult<()>;

    /// Get the synthesis record of a run.
    async fn get_synthesis(&self, run_id: Uuid) -> DomainResult<Option<StoredSynthesis>>;

    /// Count a run's artifacts by category.
    async fn count_by_category(&self, run_id: Uuid) -> DomainResult<ArtifactCounts>;

    /// Delete every artifact of a run, returning what was removed.
    async fn purge(&self, run_id: Uuid) -> DomainResult<ArtifactCounts>;
}
