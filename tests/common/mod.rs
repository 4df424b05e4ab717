//! Common test utilities for integration tests
//!
//! Provides file-backed databases and run fixtures shared across
//! integration test files.

#![allow(dead_code)]

use std::sync::Arc;

use sqlx::SqlitePool;
use tempfile::TempDir;

use customer_intel::adapters::sqlite::{
    initialize_database, PoolConfig, SqliteArtifactRepository, SqliteRunRepository,
};
use customer_intel::domain::models::{
    ArtifactCategory, ArtifactStatus, CacheConfig, NbPayload, NotebookCode, Run, RunStatus,
    SynthesisPayload,
};
use customer_intel::services::RunService;

pub type TestService = RunService<SqliteRunRepository, SqliteArtifactRepository>;

/// A migrated database file in its own temporary directory.
///
/// Keep the `TempDir` alive for as long as the pool is used.
pub async fn temp_database(max_connections: u32) -> (TempDir, SqlitePool) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let url = format!("sqlite:{}", dir.path().join("cache.db").display());
    let config = PoolConfig {
        max_connections,
        ..PoolConfig::default()
    };
    let pool = initialize_database(&url, Some(config))
        .await
        .expect("Failed to initialize test database");
    (dir, pool)
}

pub fn service(pool: &SqlitePool, cache: &CacheConfig) -> TestService {
    RunService::with_cache_config(
        Arc::new(SqliteRunRepository::new(pool.clone())),
        Arc::new(SqliteArtifactRepository::new(pool.clone())),
        cache,
    )
}

pub fn nb_payload(headline: &str) -> NbPayload {
    let mut payload = NbPayload::default();
    payload
        .fields
        .insert("headline".to_string(), serde_json::json!(headline));
    payload
}

pub fn synthesis_payload(summary: &str) -> SynthesisPayload {
    let mut payload = SynthesisPayload::default();
    payload
        .sections
        .insert("summary".to_string(), summary.to_string());
    payload
}

/// Drive a pending run to completion, writing every category it regenerates.
pub async fn complete_run(service: &TestService, run: &Run) -> Run {
    service
        .advance(run.id, RunStatus::Processing)
        .await
        .expect("Failed to start run");

    if run.forced_categories.contains(&ArtifactCategory::Nb) {
        for n in 1..=15 {
            let code = NotebookCode::new(n).expect("valid notebook code");
            service
                .record_nb_result(
                    run.id,
                    code,
                    ArtifactStatus::Completed,
                    nb_payload(&format!("finding {n}")),
                    100,
                )
                .await
                .expect("Failed to record NB result");
        }
    }
    if run.forced_categories.contains(&ArtifactCategory::Synthesis) {
        service
            .record_synthesis(run.id, synthesis_payload("playbook"), 500)
            .await
            .expect("Failed to record synthesis");
    }

    service
        .advance(run.id, RunStatus::Completed)
        .await
        .expect("Failed to complete run")
}
