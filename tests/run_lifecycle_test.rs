//! Run status transitions and administrative operations.

mod common;

use customer_intel::domain::models::{
    ArtifactCategory, ArtifactStatus, CacheConfig, CompanyPair, ForceFailOutcome, NotebookCode,
    RefreshConfig, RunStatus,
};
use customer_intel::domain::ports::RunFilter;
use customer_intel::DomainError;

use common::{complete_run, nb_payload, service, synthesis_payload, temp_database};

#[tokio::test]
async fn test_full_lifecycle_stamps_completion() {
    let (_dir, pool) = temp_database(2).await;
    let service = service(&pool, &CacheConfig::default());

    let run = service
        .create_run(CompanyPair::new(10, Some(20)), RefreshConfig::default(), Some(3))
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Pending);
    assert_eq!(run.user_id, Some(3));

    let processing = service.advance(run.id, RunStatus::Processing).await.unwrap();
    assert!(processing.completed_at.is_none());
    assert!(processing.modified_at >= run.modified_at);

    let done = service.advance(run.id, RunStatus::Completed).await.unwrap();
    let status = service.status(run.id).await.unwrap();
    assert_eq!(status.status, RunStatus::Completed);
    let completed_at = status.completed_at.expect("completion time is stamped");
    assert!((completed_at - done.completed_at.unwrap()).num_milliseconds().abs() < 1);
}

#[tokio::test]
async fn test_illegal_transitions_leave_the_run_unchanged() {
    let (_dir, pool) = temp_database(2).await;
    let service = service(&pool, &CacheConfig::default());
    let run = service
        .create_run(CompanyPair::new(10, None), RefreshConfig::default(), None)
        .await
        .unwrap();

    let err = service.advance(run.id, RunStatus::Completed).await.unwrap_err();
    assert!(matches!(
        err,
        DomainError::InvalidTransition { from: RunStatus::Pending, to: RunStatus::Completed }
    ));

    complete_run(&service, &run).await;
    let done = service.get_run(run.id).await.unwrap();
    for target in [RunStatus::Pending, RunStatus::Processing, RunStatus::Failed] {
        let err = service.advance(run.id, target).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { from: RunStatus::Completed, .. }));
    }
    assert_eq!(service.get_run(run.id).await.unwrap(), done);
}

#[tokio::test]
async fn test_force_fail_only_touches_active_runs() {
    let (_dir, pool) = temp_database(2).await;
    let service = service(&pool, &CacheConfig::default());
    let pair = CompanyPair::new(10, Some(20));

    let pending = service.create_run(pair, RefreshConfig::default(), None).await.unwrap();
    assert_eq!(
        service.force_fail(pending.id).await.unwrap(),
        ForceFailOutcome::Failed { previous: RunStatus::Pending }
    );
    let failed = service.get_run(pending.id).await.unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert!(failed.completed_at.is_none());

    // Failing twice is a no-op.
    assert_eq!(
        service.force_fail(pending.id).await.unwrap(),
        ForceFailOutcome::AlreadyTerminal { status: RunStatus::Failed }
    );

    let completed = service.create_run(pair, RefreshConfig::default(), None).await.unwrap();
    complete_run(&service, &completed).await;
    let completed = service.get_run(completed.id).await.unwrap();
    assert_eq!(
        service.force_fail(completed.id).await.unwrap(),
        ForceFailOutcome::AlreadyTerminal { status: RunStatus::Completed }
    );
    assert_eq!(service.get_run(completed.id).await.unwrap(), completed);
}

#[tokio::test]
async fn test_force_fail_unknown_run() {
    let (_dir, pool) = temp_database(2).await;
    let service = service(&pool, &CacheConfig::default());

    let id = uuid::Uuid::new_v4();
    assert!(matches!(service.force_fail(id).await, Err(DomainError::RunNotFound(missing)) if missing == id));
}

#[tokio::test]
async fn test_artifacts_only_accepted_while_processing() {
    let (_dir, pool) = temp_database(2).await;
    let service = service(&pool, &CacheConfig::default());
    let run = service
        .create_run(CompanyPair::new(10, Some(20)), RefreshConfig::default(), None)
        .await
        .unwrap();
    let code = NotebookCode::new(1).unwrap();

    let err = service
        .record_nb_result(run.id, code, ArtifactStatus::Completed, nb_payload("early"), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ValidationFailed(_)));

    service.advance(run.id, RunStatus::Processing).await.unwrap();
    service
        .record_nb_result(run.id, code, ArtifactStatus::Completed, nb_payload("first"), 10)
        .await
        .unwrap();
    // Re-recording the same notebook replaces it.
    service
        .record_nb_result(run.id, code, ArtifactStatus::Completed, nb_payload("second"), 20)
        .await
        .unwrap();
    service.record_synthesis(run.id, synthesis_payload("plan"), 30).await.unwrap();

    let inspection = service.inspect_cache(run.id).await.unwrap();
    assert_eq!(inspection.nb.stored, 1);
    assert_eq!(inspection.synthesis.stored, 1);
    assert!(inspection.nb.regenerated);
}

#[tokio::test]
async fn test_reusing_run_rejects_reused_categories() {
    let (_dir, pool) = temp_database(2).await;
    let service = service(&pool, &CacheConfig::default());
    let pair = CompanyPair::new(10, Some(20));

    let a = service.create_run(pair, RefreshConfig::default(), None).await.unwrap();
    complete_run(&service, &a).await;

    let refresh = RefreshConfig { force_synthesis_refresh: true, ..Default::default() };
    let b = service.create_run(pair, refresh, None).await.unwrap();
    assert_eq!(b.forced_categories.len(), 1);
    assert!(b.forced_categories.contains(&ArtifactCategory::Synthesis));

    service.advance(b.id, RunStatus::Processing).await.unwrap();
    let err = service
        .record_nb_result(
            b.id,
            NotebookCode::new(2).unwrap(),
            ArtifactStatus::Completed,
            nb_payload("stale"),
            0,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ValidationFailed(msg) if msg.contains(&a.id.to_string())));

    service.record_synthesis(b.id, synthesis_payload("fresh"), 0).await.unwrap();
}

#[tokio::test]
async fn test_stuck_runs_and_purge() {
    let (_dir, pool) = temp_database(2).await;
    let service = service(&pool, &CacheConfig::default());
    let pair = CompanyPair::new(10, Some(20));

    let run = service.create_run(pair, RefreshConfig::default(), None).await.unwrap();
    service.advance(run.id, RunStatus::Processing).await.unwrap();

    // Nothing is stale under the default hour threshold.
    assert!(service.list_stuck(None).await.unwrap().is_empty());

    sqlx::query("UPDATE runs SET time_modified = '2000-01-01T00:00:00.000000Z' WHERE id = ?")
        .bind(run.id.to_string())
        .execute(&pool)
        .await
        .unwrap();
    let stuck = service.list_stuck(Some(5)).await.unwrap();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].id, run.id);

    service.force_fail(run.id).await.unwrap();
    assert!(service.list_stuck(Some(5)).await.unwrap().is_empty());

    let done = service.create_run(pair, RefreshConfig::default(), None).await.unwrap();
    complete_run(&service, &done).await;
    let removed = service.purge_artifacts(done.id).await.unwrap();
    assert_eq!(removed.nb, 15);
    assert_eq!(removed.synthesis, 1);

    // With its artifacts gone the run still reads as the latest completion,
    // but reusing it would regenerate everything.
    let next = service.create_run(pair, RefreshConfig::default(), None).await.unwrap();
    assert_eq!(next.reused_from_run_id, Some(done.id));
    assert_eq!(next.forced_categories.len(), 2);
}

#[tokio::test]
async fn test_list_and_delete() {
    let (_dir, pool) = temp_database(2).await;
    let service = service(&pool, &CacheConfig::default());

    let first = service
        .create_run(CompanyPair::new(1, Some(2)), RefreshConfig::default(), None)
        .await
        .unwrap();
    let second = service
        .create_run(CompanyPair::new(3, None), RefreshConfig::default(), None)
        .await
        .unwrap();
    service.advance(second.id, RunStatus::Processing).await.unwrap();

    let all = service.list_runs(RunFilter::default()).await.unwrap();
    assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![second.id, first.id]);

    let processing = service
        .list_runs(RunFilter { status: Some(RunStatus::Processing), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(processing.len(), 1);

    service.delete_run(first.id).await.unwrap();
    assert!(matches!(service.get_run(first.id).await, Err(DomainError::RunNotFound(_))));
    assert!(matches!(service.delete_run(first.id).await, Err(DomainError::RunNotFound(_))));
}
