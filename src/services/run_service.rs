//! Run service: the use cases behind the CLI.
//!
//! Creation applies the cache reuse policy inside the repository's insert
//! transaction. Status changes go through the domain state machine first and
//! are then persisted as a compare-and-swap on the stored status.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::cache_reuse::CacheReusePolicy;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ArtifactCategory, ArtifactCounts, ArtifactStatus, CacheConfig, CompanyPair, ForceFailOutcome,
    LineageSnapshot, NbPayload, NbResult, NotebookCode, RefreshConfig, Run, RunStatus,
    SynthesisPayload, SynthesisRecord,
};
use crate::domain::ports::{ArtifactRepository, RunFilter, RunRepository};

/// Attempts at a force-fail before giving up on a run that keeps changing.
const FORCE_FAIL_ATTEMPTS: usize = 3;

/// Status of one run as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStatusView {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub reused_from_run_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Run> for RunStatusView {
    fn from(run: &Run) -> Self {
        Self {
            run_id: run.id,
            status: run.status,
            reused_from_run_id: run.reused_from_run_id,
            created_at: run.created_at,
            modified_at: run.modified_at,
            completed_at: run.completed_at,
        }
    }
}

/// Where a run gets one artifact category from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryInspection {
    /// Run holding the artifacts; `None` when the chain is broken
    pub owner_run_id: Option<Uuid>,
    /// Whether this run generates the category itself
    pub regenerated: bool,
    pub stored: usize,
    /// Stored artifacts that fail schema validation
    pub undecodable: usize,
}

/// What a run's cache lineage looks like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheInspection {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub reused_from_run_id: Option<Uuid>,
    /// Runs on the lineage chain, this run first
    pub lineage: Vec<Uuid>,
    pub lineage_intact: bool,
    pub lineage_problem: Option<String>,
    /// Artifacts stored under this run itself
    pub held: ArtifactCounts,
    pub nb: CategoryInspection,
    pub synthesis: CategoryInspection,
}

pub struct RunService<R: RunRepository, A: ArtifactRepository> {
    runs: Arc<R>,
    artifacts: Arc<A>,
    policy: CacheReusePolicy,
    stuck_after: Duration,
}

impl<R: RunRepository, A: ArtifactRepository> RunService<R, A> {
    pub fn new(runs: Arc<R>, artifacts: Arc<A>) -> Self {
        Self::with_cache_config(runs, artifacts, &CacheConfig::default())
    }

    pub fn with_cache_config(runs: Arc<R>, artifacts: Arc<A>, config: &CacheConfig) -> Self {
        Self {
            runs,
            artifacts,
            policy: CacheReusePolicy::new(config.max_lineage_depth),
            stuck_after: minutes(config.stuck_after_minutes),
        }
    }

    /// Submit a new run, deciding cache reuse atomically with the insert.
    pub async fn create_run(
        &self,
        pair: CompanyPair,
        refresh: RefreshConfig,
        user_id: Option<i64>,
    ) -> DomainResult<Run> {
        let mut run = Run::new(pair, refresh);
        if let Some(user_id) = user_id {
            run = run.with_user(user_id);
        }
        run.validate().map_err(DomainError::ValidationFailed)?;

        let policy = self.policy;
        let resolve = move |lookup: DomainResult<Option<LineageSnapshot>>| policy.decide(&refresh, lookup);

        self.runs
            .create_with_lineage(&run, policy.max_lineage_depth(), &resolve)
            .await
    }

    /// Get a run by ID.
    pub async fn get_run(&self, id: Uuid) -> DomainResult<Run> {
        self.runs.get(id).await?.ok_or(DomainError::RunNotFound(id))
    }

    pub async fn status(&self, id: Uuid) -> DomainResult<RunStatusView> {
        let run = self.get_run(id).await?;
        Ok(RunStatusView::from(&run))
    }

    /// List runs with optional filters.
    pub async fn list_runs(&self, filter: RunFilter) -> DomainResult<Vec<Run>> {
        self.runs.list(filter).await
    }

    /// Move a run along the state machine.
    ///
    /// Fails with `InvalidTransition` for an edge the state machine does not
    /// allow, judged against the stored status at write time.
    pub async fn advance(&self, id: Uuid, target: RunStatus) -> DomainResult<Run> {
        let mut run = self.get_run(id).await?;
        let expected = run.status;
        run.transition_to(target)?;

        if self.runs.update_status_if(&run, expected).await? {
            info!(run_id = %id, from = %expected, to = %target, "run status changed");
            return Ok(run);
        }

        // Lost the race: report against what is stored now.
        let current = self.get_run(id).await?;
        if current.can_transition_to(target) {
            Err(DomainError::ConcurrencyConflict(id))
        } else {
            Err(DomainError::InvalidTransition {
                from: current.status,
                to: target,
            })
        }
    }

    /// Administratively fail an active run.
    ///
    /// Terminal runs are reported, not changed. In-flight work is not
    /// stopped; only the record is.
    pub async fn force_fail(&self, id: Uuid) -> DomainResult<ForceFailOutcome> {
        for _ in 0..FORCE_FAIL_ATTEMPTS {
            let mut run = self.get_run(id).await?;
            let expected = run.status;

            let outcome = run.force_fail();
            if let ForceFailOutcome::AlreadyTerminal { status } = outcome {
                info!(run_id = %id, %status, "force-fail skipped, run already terminal");
                return Ok(outcome);
            }

            if self.runs.update_status_if(&run, expected).await? {
                warn!(run_id = %id, previous = %expected, "run force-failed");
                return Ok(outcome);
            }
        }

        Err(DomainError::ConcurrencyConflict(id))
    }

    /// Claim the oldest pending run for processing.
    pub async fn claim_next(&self) -> DomainResult<Option<Run>> {
        let claimed = self.runs.claim_next_pending().await?;
        if let Some(run) = &claimed {
            info!(run_id = %run.id, pair = %run.pair, "run claimed");
        }
        Ok(claimed)
    }

    /// Active runs untouched for longer than `older_than_minutes`, or the
    /// configured threshold.
    pub async fn list_stuck(&self, older_than_minutes: Option<u64>) -> DomainResult<Vec<Run>> {
        let threshold = older_than_minutes.map_or(self.stuck_after, minutes);
        self.runs.list_stale(Utc::now() - threshold).await
    }

    /// Store one notebook's output for a processing run.
    ///
    /// A `Failed` result is kept so the run's record is complete, but a later
    /// run reusing it regenerates the NB category.
    pub async fn record_nb_result(
        &self,
        run_id: Uuid,
        code: NotebookCode,
        status: ArtifactStatus,
        payload: NbPayload,
        tokens_used: u32,
    ) -> DomainResult<NbResult> {
        self.writable_run(run_id, ArtifactCategory::Nb).await?;
        payload.validate().map_err(DomainError::ValidationFailed)?;

        let result = NbResult::new(run_id, code, payload)
            .with_status(status)
            .with_tokens(tokens_used);
        self.artifacts.upsert_nb_result(&result).await?;

        info!(%run_id, nb_code = %code, %status, tokens_used, "NB result recorded");
        Ok(result)
    }

    /// Store the synthesis output for a processing run.
    pub async fn record_synthesis(
        &self,
        run_id: Uuid,
        payload: SynthesisPayload,
        tokens_used: u32,
    ) -> DomainResult<SynthesisRecord> {
        self.writable_run(run_id, ArtifactCategory::Synthesis).await?;
        payload.validate().map_err(DomainError::ValidationFailed)?;

        let record = SynthesisRecord::new(run_id, payload).with_tokens(tokens_used);
        self.artifacts.upsert_synthesis(&record).await?;

        info!(%run_id, tokens_used, "synthesis recorded");
        Ok(record)
    }

    async fn writable_run(&self, run_id: Uuid, category: ArtifactCategory) -> DomainResult<Run> {
        let run = self.get_run(run_id).await?;

        if run.status != RunStatus::Processing {
            return Err(DomainError::ValidationFailed(format!(
                "Run {run_id} is {}; artifacts are only recorded while processing",
                run.status
            )));
        }
        if !run.forced_categories.contains(&category) {
            return Err(DomainError::ValidationFailed(format!(
                "Run {run_id} reuses {category} artifacts from {}",
                run.reused_from_run_id
                    .map_or_else(|| "an earlier run".to_string(), |id| id.to_string())
            )));
        }

        Ok(run)
    }

    /// Describe where a run's artifacts come from and whether they are usable.
    ///
    /// Categories the run generates itself are read from the run even when
    /// the rest of its lineage is broken.
    pub async fn inspect_cache(&self, run_id: Uuid) -> DomainResult<CacheInspection> {
        let snapshot = self
            .runs
            .lineage(run_id, self.policy.max_lineage_depth())
            .await?
            .ok_or(DomainError::RunNotFound(run_id))?;

        let lineage_problem = self.lineage_problem(&snapshot);
        let intact = lineage_problem.is_none();
        let head = &snapshot.head;

        let nb_regenerated = head.forced_categories.contains(&ArtifactCategory::Nb);
        let nb = if nb_regenerated && !intact {
            self.artifacts.list_nb_results(run_id).await?
        } else {
            snapshot.artifacts.nb.clone()
        };
        let nb = CategoryInspection {
            owner_run_id: (intact || nb_regenerated)
                .then(|| snapshot.owner_of(ArtifactCategory::Nb).id),
            regenerated: nb_regenerated,
            stored: nb.len(),
            undecodable: nb.iter().filter(|stored| stored.decode().is_err()).count(),
        };

        let synthesis_regenerated = head.forced_categories.contains(&ArtifactCategory::Synthesis);
        let synthesis = if synthesis_regenerated && !intact {
            self.artifacts.get_synthesis(run_id).await?
        } else {
            snapshot.artifacts.synthesis.clone()
        };
        let synthesis = CategoryInspection {
            owner_run_id: (intact || synthesis_regenerated)
                .then(|| snapshot.owner_of(ArtifactCategory::Synthesis).id),
            regenerated: synthesis_regenerated,
            stored: usize::from(synthesis.is_some()),
            undecodable: usize::from(synthesis.as_ref().is_some_and(|s| s.decode().is_err())),
        };

        Ok(CacheInspection {
            run_id,
            status: head.status,
            reused_from_run_id: head.reused_from_run_id,
            lineage: snapshot.chain().map(|run| run.id).collect(),
            lineage_intact: intact,
            lineage_problem,
            held: self.artifacts.count_by_category(run_id).await?,
            nb,
            synthesis,
        })
    }

    /// The NB result a run serves for `code`, read from the run that owns it.
    pub async fn nb_result(&self, run_id: Uuid, code: NotebookCode) -> DomainResult<NbResult> {
        let owner = self.serving_run(run_id, ArtifactCategory::Nb).await?;
        self.artifacts
            .get_nb_result(owner, code)
            .await?
            .ok_or(DomainError::ArtifactNotFound {
                run_id,
                category: ArtifactCategory::Nb,
            })?
            .decode()
    }

    /// The synthesis a run serves, read from the run that owns it.
    pub async fn synthesis(&self, run_id: Uuid) -> DomainResult<SynthesisRecord> {
        let owner = self.serving_run(run_id, ArtifactCategory::Synthesis).await?;
        self.artifacts
            .get_synthesis(owner)
            .await?
            .ok_or(DomainError::ArtifactNotFound {
                run_id,
                category: ArtifactCategory::Synthesis,
            })?
            .decode()
    }

    /// Run holding `category` for `run_id`; a broken lineage serves nothing
    /// the run did not generate itself.
    async fn serving_run(&self, run_id: Uuid, category: ArtifactCategory) -> DomainResult<Uuid> {
        let snapshot = self
            .runs
            .lineage(run_id, self.policy.max_lineage_depth())
            .await?
            .ok_or(DomainError::RunNotFound(run_id))?;

        if snapshot.head.forced_categories.contains(&category) {
            return Ok(run_id);
        }
        if let Some(problem) = self.lineage_problem(&snapshot) {
            return Err(DomainError::DanglingCacheChain {
                run_id,
                reason: problem,
            });
        }
        Ok(snapshot.owner_of(category).id)
    }

    /// Why a run's lineage cannot serve artifacts, if it cannot.
    fn lineage_problem(&self, snapshot: &LineageSnapshot) -> Option<String> {
        match self.policy.check_lineage(snapshot) {
            Ok(()) => None,
            Err(DomainError::DanglingCacheChain { reason, .. }) => Some(reason),
            Err(other) => Some(other.to_string()),
        }
    }

    /// Delete every artifact a run holds.
    pub async fn purge_artifacts(&self, run_id: Uuid) -> DomainResult<ArtifactCounts> {
        self.get_run(run_id).await?;
        let removed = self.artifacts.purge(run_id).await?;
        warn!(%run_id, nb = removed.nb, synthesis = removed.synthesis, "artifacts purged");
        Ok(removed)
    }

    /// Delete a run and its artifacts. Runs reusing it fall back to full
    /// regeneration from then on.
    pub async fn delete_run(&self, run_id: Uuid) -> DomainResult<()> {
        self.runs.delete(run_id).await?;
        warn!(%run_id, "run deleted");
        Ok(())
    }

    /// Most recent completed run for a pair.
    pub async fn latest_completed(&self, pair: CompanyPair) -> DomainResult<Option<Run>> {
        self.runs.latest_completed_for_pair(&pair).await
    }
}

/// Longest stuck threshold honoured, one century.
const MAX_THRESHOLD_MINUTES: u64 = 100 * 365 * 24 * 60;

fn minutes(value: u64) -> Duration {
    Duration::minutes(i64::try_from(value.min(MAX_THRESHOLD_MINUTES)).unwrap_or_default())
}
