//! Run repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{CompanyPair, LineageSnapshot, ReuseDecision, Run, RunStatus};

/// Filter criteria for listing runs.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub status: Option<RunStatus>,
    pub source_company_id: Option<i64>,
    pub target_company_id: Option<i64>,
    pub limit: Option<i64>,
}

/// Decides reuse from what the repository found for the new run's pair.
///
/// Receives `Ok(None)` when no completed run exists for the pair and
/// `Err` when the best candidate could not be loaded.
pub type ReuseResolver<'a> =
    &'a (dyn Fn(DomainResult<Option<LineageSnapshot>>) -> ReuseDecision + Send + Sync);

/// Repository interface for Run persistence.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Insert a new run, choosing its cache lineage atomically with the insert.
    ///
    /// The candidate lookup and the write of `reused_from_run_id` happen in
    /// one transaction, so no other run for the pair can complete in between.
    async fn create_with_lineage(
        &self,
        run: &Run,
        max_lineage_depth: u32,
        resolve: ReuseResolver<'_>,
    ) -> DomainResult<Run>;

    /// Get a run by ID.
    async fn get(&self, id: Uuid) -> DomainResult<Option<Run>>;

    /// Load a run with the chain it reuses from and the artifacts that chain serves.
    async fn lineage(&self, id: Uuid, max_lineage_depth: u32) -> DomainResult<Option<LineageSnapshot>>;

    /// List runs with optional filters, newest first.
    async fn list(&self, filter: RunFilter) -> DomainResult<Vec<Run>>;

    /// Persist `run`'s status, modification and completion times in one write,
    /// only if the stored status is still `expected`.
    ///
    /// Returns `false` when the stored status had moved on.
    async fn update_status_if(&self, run: &Run, expected: RunStatus) -> DomainResult<bool>;

    /// Atomically move the oldest pending run to processing.
    async fn claim_next_pending(&self) -> DomainResult<Option<Run>>;

    /// Active runs not modified since `before`.
    async fn list_stale(&self, before: DateTime<Utc>) -> DomainResult<Vec<Run>>;

    /// Most recent completed run for a company pair.
    async fn latest_completed_for_pair(&self, pair: &CompanyPair) -> DomainResult<Option<Run>>;

    /// Delete a run and, through the schema, its artifacts.
    async fn delete(&self, id: Uuid) -> DomainResult<()>;
}
