//! SQLite implementation of the RunRepository.

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use super::artifact_repository::{fetch_nb_results, fetch_synthesis};
use super::{format_datetime, parse_datetime, parse_json_or_default, parse_optional_datetime, parse_optional_uuid, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ArtifactCategory, ChainBreak, CompanyPair, LineageSnapshot, RefreshConfig, Run, RunStatus,
    StoredArtifacts,
};
use crate::domain::ports::{ReuseResolver, RunFilter, RunRepository};

#[derive(Clone)]
pub struct SqliteRunRepository {
    pool: SqlitePool,
}

impl SqliteRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunRepository for SqliteRunRepository {
    async fn create_with_lineage(
        &self,
        run: &Run,
        max_lineage_depth: u32,
        resolve: ReuseResolver<'_>,
    ) -> DomainResult<Run> {
        run.validate().map_err(DomainError::ValidationFailed)?;

        // The insert comes first so the transaction holds SQLite's write lock
        // before the candidate is read. No other run can complete between the
        // lookup and the lineage write below.
        let mut tx = self.pool.begin().await?;
        insert_run(&mut tx, run).await?;

        let lookup = load_candidate_lineage(&mut tx, &run.pair, run.id, max_lineage_depth).await;
        let decision = resolve(lookup);

        let mut created = run.clone();
        created.apply_reuse(&decision);

        let forced_json = serde_json::to_string(&created.forced_categories)?;
        sqlx::query("UPDATE runs SET reused_from_run_id = ?, forced_categories = ? WHERE id = ?")
            .bind(created.reused_from_run_id.map(|id| id.to_string()))
            .bind(&forced_json)
            .bind(created.id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            run_id = %created.id,
            pair = %created.pair,
            reused_from = ?created.reused_from_run_id,
            reason = %decision.reason,
            "run created"
        );
        Ok(created)
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Run>> {
        let mut conn = self.pool.acquire().await?;
        fetch_run(&mut conn, id).await
    }

    async fn lineage(&self, id: Uuid, max_lineage_depth: u32) -> DomainResult<Option<LineageSnapshot>> {
        let mut tx = self.pool.begin().await?;
        let Some(head) = fetch_run(&mut tx, id).await? else {
            return Ok(None);
        };
        let snapshot = walk_lineage(&mut tx, head, max_lineage_depth).await?;
        tx.commit().await?;
        Ok(Some(snapshot))
    }

    async fn list(&self, filter: RunFilter) -> DomainResult<Vec<Run>> {
        let mut query = String::from("SELECT * FROM runs WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(status) = &filter.status {
            query.push_str(" AND status = ?");
            bindings.push(status.as_str().to_string());
        }
        if let Some(source) = filter.source_company_id {
            query.push_str(" AND source_company_id = ?");
            bindings.push(source.to_string());
        }
        if let Some(target) = filter.target_company_id {
            query.push_str(" AND target_company_id = ?");
            bindings.push(target.to_string());
        }

        query.push_str(" ORDER BY time_created DESC");
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {}", limit.max(0)));
        }

        let mut q = sqlx::query_as::<_, RunRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<RunRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_status_if(&self, run: &Run, expected: RunStatus) -> DomainResult<bool> {
        // Status and both timestamps in one statement: there is no moment where
        // a completed row lacks its completion time.
        let result = sqlx::query(
            r#"UPDATE runs SET status = ?, time_modified = ?, time_completed = ?
               WHERE id = ? AND status = ?"#
        )
        .bind(run.status.as_str())
        .bind(format_datetime(run.modified_at))
        .bind(run.completed_at.map(format_datetime))
        .bind(run.id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim_next_pending(&self) -> DomainResult<Option<Run>> {
        // Must stay a single statement: under WAL a read-then-write
        // transaction cannot upgrade after another writer commits.
        let row: Option<RunRow> = sqlx::query_as(
            r#"UPDATE runs SET status = 'processing', time_modified = ?
               WHERE id = (
                   SELECT id FROM runs WHERE status = 'pending'
                   ORDER BY time_created ASC LIMIT 1
               ) AND status = 'pending'
               RETURNING *"#
        )
        .bind(format_datetime(Utc::now()))
        .fetch_optional(&self.pool)
        .await?;

        if row.is_none() {
            debug!("no pending runs to claim");
        }
        row.map(TryInto::try_into).transpose()
    }

    async fn list_stale(&self, before: DateTime<Utc>) -> DomainResult<Vec<Run>> {
        let rows: Vec<RunRow> = sqlx::query_as(
            r#"SELECT * FROM runs
               WHERE status IN ('pending', 'processing') AND time_modified < ?
               ORDER BY time_modified ASC"#
        )
        .bind(format_datetime(before))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn latest_completed_for_pair(&self, pair: &CompanyPair) -> DomainResult<Option<Run>> {
        let mut conn = self.pool.acquire().await?;
        fetch_latest_completed(&mut conn, pair, None).await
    }

    async fn delete(&self, id: Uuid) -> DomainResult<()> {
        let result = sqlx::query("DELETE FROM runs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::RunNotFound(id));
        }

        Ok(())
    }
}

async fn insert_run(conn: &mut SqliteConnection, run: &Run) -> DomainResult<()> {
    let refresh_json = serde_json::to_string(&run.refresh_config)?;
    let forced_json = serde_json::to_string(&run.forced_categories)?;

    sqlx::query(
        r#"INSERT INTO runs (id, source_company_id, target_company_id, user_id, status,
           refresh_config, reused_from_run_id, forced_categories,
           time_created, time_modified, time_completed)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
    .bind(run.id.to_string())
    .bind(run.pair.source_company_id)
    .bind(run.pair.target_company_id)
    .bind(run.user_id)
    .bind(run.status.as_str())
    .bind(&refresh_json)
    .bind(run.reused_from_run_id.map(|id| id.to_string()))
    .bind(&forced_json)
    .bind(format_datetime(run.created_at))
    .bind(format_datetime(run.modified_at))
    .bind(run.completed_at.map(format_datetime))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn fetch_run(conn: &mut SqliteConnection, id: Uuid) -> DomainResult<Option<Run>> {
    let row: Option<RunRow> = sqlx::query_as("SELECT * FROM runs WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.map(TryInto::try_into).transpose()
}

async fn fetch_latest_completed(
    conn: &mut SqliteConnection,
    pair: &CompanyPair,
    exclude: Option<Uuid>,
) -> DomainResult<Option<Run>> {
    // `IS` matches NULL targets as equal.
    let row: Option<RunRow> = sqlx::query_as(
        r#"SELECT * FROM runs
           WHERE source_company_id = ? AND target_company_id IS ?
             AND status = 'completed' AND id IS NOT ?
           ORDER BY time_completed DESC, time_created DESC
           LIMIT 1"#
    )
    .bind(pair.source_company_id)
    .bind(pair.target_company_id)
    .bind(exclude.map(|id| id.to_string()))
    .fetch_optional(&mut *conn)
    .await?;

    row.map(TryInto::try_into).transpose()
}

/// Load the best reuse candidate for `pair` with its lineage.
async fn load_candidate_lineage(
    conn: &mut SqliteConnection,
    pair: &CompanyPair,
    new_run_id: Uuid,
    max_depth: u32,
) -> DomainResult<Option<LineageSnapshot>> {
    match fetch_latest_completed(conn, pair, Some(new_run_id)).await? {
        Some(candidate) => walk_lineage(conn, candidate, max_depth).await.map(Some),
        None => Ok(None),
    }
}

/// Follow `reused_from_run_id` from `head`.
///
/// Stops at a run that reuses nothing, a missing run, a cycle, or after
/// `max_depth` hops. Artifacts are only loaded for an unbroken chain; judging
/// the result is left to the caller.
async fn walk_lineage(
    conn: &mut SqliteConnection,
    head: Run,
    max_depth: u32,
) -> DomainResult<LineageSnapshot> {
    let mut seen: HashSet<Uuid> = HashSet::from([head.id]);
    let mut ancestors: Vec<Run> = Vec::new();
    let mut chain_break = None;
    let mut next = head.reused_from_run_id;

    while let Some(parent_id) = next {
        if ancestors.len() >= max_depth as usize {
            chain_break = Some(ChainBreak::TooDeep(parent_id));
            break;
        }
        if !seen.insert(parent_id) {
            chain_break = Some(ChainBreak::Cycle(parent_id));
            break;
        }
        let Some(parent) = fetch_run(conn, parent_id).await? else {
            chain_break = Some(ChainBreak::Missing(parent_id));
            break;
        };
        next = parent.reused_from_run_id;
        ancestors.push(parent);
    }

    let mut snapshot = LineageSnapshot::new(head, ancestors, chain_break);
    if snapshot.is_intact() {
        let nb_owner = snapshot.owner_of(ArtifactCategory::Nb).id;
        let synthesis_owner = snapshot.owner_of(ArtifactCategory::Synthesis).id;
        snapshot.artifacts = StoredArtifacts {
            nb: fetch_nb_results(conn, nb_owner).await?,
            synthesis: fetch_synthesis(conn, synthesis_owner).await?,
        };
    }

    Ok(snapshot)
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: String,
    source_company_id: i64,
    target_company_id: Option<i64>,
    user_id: Option<i64>,
    status: String,
    refresh_config: Option<String>,
    reused_from_run_id: Option<String>,
    forced_categories: Option<String>,
    time_created: String,
    time_modified: String,
    time_completed: Option<String>,
}

impl TryFrom<RunRow> for Run {
    type Error = DomainError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let status = RunStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;

        let refresh_config: RefreshConfig = parse_json_or_default(row.refresh_config)?;
        let forced_categories: BTreeSet<ArtifactCategory> = parse_json_or_default(row.forced_categories)?;

        Ok(Run {
            id: parse_uuid(&row.id)?,
            pair: CompanyPair::new(row.source_company_id, row.target_company_id),
            user_id: row.user_id,
            status,
            refresh_config,
            reused_from_run_id: parse_optional_uuid(row.reused_from_run_id)?,
            forced_categories,
            created_at: parse_datetime(&row.time_created)?,
            modified_at: parse_datetime(&row.time_modified)?,
            completed_at: parse_optional_datetime(row.time_completed)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::{ReuseDecision, ReuseReason};

    async fn setup_test_repo() -> SqliteRunRepository {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteRunRepository::new(pool)
    }

    fn no_reuse(_: DomainResult<Option<LineageSnapshot>>) -> ReuseDecision {
        ReuseDecision::full_regeneration(ReuseReason::NoPriorRun)
    }

    async fn completed_run(repo: &SqliteRunRepository, pair: CompanyPair) -> Run {
        let mut run = repo
            .create_with_lineage(&Run::new(pair, RefreshConfig::default()), 8, &no_reuse)
            .await
            .unwrap();
        for status in [RunStatus::Processing, RunStatus::Completed] {
            let expected = run.status;
            run.transition_to(status).unwrap();
            assert!(repo.update_status_if(&run, expected).await.unwrap());
        }
        run
    }

    #[tokio::test]
    async fn test_create_and_get_run() {
        let repo = setup_test_repo().await;
        let run = Run::new(CompanyPair::new(7, None), RefreshConfig::default()).with_user(42);

        let created = repo.create_with_lineage(&run, 8, &no_reuse).await.unwrap();
        let loaded = repo.get(created.id).await.unwrap().unwrap();

        assert_eq!(loaded.pair, CompanyPair::new(7, None));
        assert_eq!(loaded.user_id, Some(42));
        assert_eq!(loaded.status, RunStatus::Pending);
        assert_eq!(loaded.forced_categories, created.forced_categories);
    }

    #[tokio::test]
    async fn test_resolver_sees_latest_completed_candidate() {
        let repo = setup_test_repo().await;
        let pair = CompanyPair::new(1, Some(2));
        let _older = completed_run(&repo, pair).await;
        let newer = completed_run(&repo, pair).await;

        let seen = std::sync::Mutex::new(None);
        let resolve = |lookup: DomainResult<Option<LineageSnapshot>>| {
            let snapshot = lookup.unwrap().unwrap();
            *seen.lock().unwrap() = Some(snapshot.head.id);
            ReuseDecision::reuse(snapshot.head.id, BTreeSet::new())
        };

        let created = repo
            .create_with_lineage(&Run::new(pair, RefreshConfig::default()), 8, &resolve)
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(newer.id));
        assert_eq!(created.reused_from_run_id, Some(newer.id));
        assert!(created.forced_categories.is_empty());

        let stored = repo.get(created.id).await.unwrap().unwrap();
        assert_eq!(stored.reused_from_run_id, Some(newer.id));
    }

    #[tokio::test]
    async fn test_candidate_requires_identical_pair() {
        let repo = setup_test_repo().await;
        completed_run(&repo, CompanyPair::new(1, Some(2))).await;

        assert!(repo.latest_completed_for_pair(&CompanyPair::new(1, None)).await.unwrap().is_none());
        assert!(repo.latest_completed_for_pair(&CompanyPair::new(1, Some(3))).await.unwrap().is_none());
        assert!(repo.latest_completed_for_pair(&CompanyPair::new(1, Some(2))).await.unwrap().is_some());

        completed_run(&repo, CompanyPair::new(1, None)).await;
        assert!(repo.latest_completed_for_pair(&CompanyPair::new(1, None)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_snapshot_reports_missing_ancestor() {
        let repo = setup_test_repo().await;
        let pair = CompanyPair::new(5, Some(6));
        let origin = completed_run(&repo, pair).await;

        let follow_latest = |lookup: DomainResult<Option<LineageSnapshot>>| match lookup {
            Ok(Some(snapshot)) => ReuseDecision::reuse(snapshot.head.id, BTreeSet::new()),
            _ => ReuseDecision::full_regeneration(ReuseReason::NoPriorRun),
        };
        let mut reuser = repo
            .create_with_lineage(&Run::new(pair, RefreshConfig::default()), 8, &follow_latest)
            .await
            .unwrap();
        assert_eq!(reuser.reused_from_run_id, Some(origin.id));
        for status in [RunStatus::Processing, RunStatus::Completed] {
            let expected = reuser.status;
            reuser.transition_to(status).unwrap();
            repo.update_status_if(&reuser, expected).await.unwrap();
        }

        repo.delete(origin.id).await.unwrap();

        let seen = std::sync::Mutex::new(None);
        let inspect = |lookup: DomainResult<Option<LineageSnapshot>>| {
            *seen.lock().unwrap() = lookup.unwrap().map(|s| s.chain_break);
            ReuseDecision::full_regeneration(ReuseReason::DanglingChain)
        };
        repo.create_with_lineage(&Run::new(pair, RefreshConfig::default()), 8, &inspect)
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            Some(Some(ChainBreak::Missing(origin.id)))
        );
    }

    #[tokio::test]
    async fn test_lineage_loads_each_category_from_its_owner() {
        use crate::adapters::sqlite::SqliteArtifactRepository;
        use crate::domain::models::{NbPayload, NbResult, NotebookCode, SynthesisPayload, SynthesisRecord};
        use crate::domain::ports::ArtifactRepository;

        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteRunRepository::new(pool.clone());
        let artifacts = SqliteArtifactRepository::new(pool);
        let pair = CompanyPair::new(3, Some(4));

        let mut synthesis = SynthesisPayload::default();
        synthesis.sections.insert("summary".to_string(), "v1".to_string());

        let origin = completed_run(&repo, pair).await;
        let code = NotebookCode::new(1).unwrap();
        artifacts.upsert_nb_result(&NbResult::new(origin.id, code, NbPayload::default())).await.unwrap();
        artifacts.upsert_synthesis(&SynthesisRecord::new(origin.id, synthesis.clone())).await.unwrap();

        let only_synthesis = |lookup: DomainResult<Option<LineageSnapshot>>| match lookup {
            Ok(Some(snapshot)) => ReuseDecision::reuse(
                snapshot.head.id,
                [ArtifactCategory::Synthesis].into_iter().collect(),
            ),
            _ => ReuseDecision::full_regeneration(ReuseReason::NoPriorRun),
        };
        let mut rerun = repo
            .create_with_lineage(&Run::new(pair, RefreshConfig::default()), 8, &only_synthesis)
            .await
            .unwrap();
        synthesis.sections.insert("summary".to_string(), "v2".to_string());
        artifacts.upsert_synthesis(&SynthesisRecord::new(rerun.id, synthesis)).await.unwrap();
        for status in [RunStatus::Processing, RunStatus::Completed] {
            let expected = rerun.status;
            rerun.transition_to(status).unwrap();
            repo.update_status_if(&rerun, expected).await.unwrap();
        }

        let snapshot = repo.lineage(rerun.id, 8).await.unwrap().unwrap();
        assert!(snapshot.is_intact());
        assert_eq!(snapshot.root().id, origin.id);
        assert_eq!(snapshot.artifacts.nb.len(), 1);
        assert_eq!(snapshot.artifacts.nb[0].run_id, origin.id);
        assert_eq!(snapshot.artifacts.synthesis.unwrap().run_id, rerun.id);

        assert!(repo.lineage(Uuid::new_v4(), 8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_status_if_is_compare_and_swap() {
        let repo = setup_test_repo().await;
        let mut run = repo
            .create_with_lineage(&Run::new(CompanyPair::new(1, None), RefreshConfig::default()), 8, &no_reuse)
            .await
            .unwrap();

        run.transition_to(RunStatus::Processing).unwrap();
        assert!(repo.update_status_if(&run, RunStatus::Pending).await.unwrap());
        // Second writer still believes the run is pending.
        assert!(!repo.update_status_if(&run, RunStatus::Pending).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_next_pending_is_fifo() {
        let repo = setup_test_repo().await;
        let first = repo
            .create_with_lineage(&Run::new(CompanyPair::new(1, None), RefreshConfig::default()), 8, &no_reuse)
            .await
            .unwrap();
        let second = repo
            .create_with_lineage(&Run::new(CompanyPair::new(2, None), RefreshConfig::default()), 8, &no_reuse)
            .await
            .unwrap();

        let claimed = repo.claim_next_pending().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, RunStatus::Processing);

        let claimed = repo.claim_next_pending().await.unwrap().unwrap();
        assert_eq!(claimed.id, second.id);

        assert!(repo.claim_next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_stale_skips_terminal_runs() {
        let repo = setup_test_repo().await;
        let pending = repo
            .create_with_lineage(&Run::new(CompanyPair::new(1, None), RefreshConfig::default()), 8, &no_reuse)
            .await
            .unwrap();
        completed_run(&repo, CompanyPair::new(2, None)).await;

        let stale = repo.list_stale(Utc::now() + chrono::Duration::minutes(1)).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, pending.id);

        let none = repo.list_stale(Utc::now() - chrono::Duration::hours(1)).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_list_with_filters() {
        let repo = setup_test_repo().await;
        completed_run(&repo, CompanyPair::new(1, Some(2))).await;
        repo.create_with_lineage(&Run::new(CompanyPair::new(1, None), RefreshConfig::default()), 8, &no_reuse)
            .await
            .unwrap();
        repo.create_with_lineage(&Run::new(CompanyPair::new(3, None), RefreshConfig::default()), 8, &no_reuse)
            .await
            .unwrap();

        let by_source = repo
            .list(RunFilter { source_company_id: Some(1), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(by_source.len(), 2);

        let completed = repo
            .list(RunFilter { status: Some(RunStatus::Completed), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);

        let limited = repo.list(RunFilter { limit: Some(1), ..Default::default() }).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_run() {
        let repo = setup_test_repo().await;
        let id = Uuid::new_v4();
        assert!(matches!(repo.delete(id).await, Err(DomainError::RunNotFound(missing)) if missing == id));
    }
}
