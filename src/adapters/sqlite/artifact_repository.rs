//! SQLite implementation of the ArtifactRepository.

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_uuid};
use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ArtifactCounts, NbResult, NotebookCode, StoredNbResult, StoredSynthesis,
    SynthesisRecord,
};
use crate::domain::ports::ArtifactRepository;

#[derive(Clone)]
pub struct SqliteArtifactRepository {
    pool: SqlitePool,
}

impl SqliteArtifactRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtifactRepository for SqliteArtifactRepository {
    async fn upsert_nb_result(&self, result: &NbResult) -> DomainResult<()> {
        let payload_json = serde_json::to_string(&result.payload)?;

        sqlx::query(
            r#"INSERT INTO nb_results (run_id, nb_code, status, payload, tokens_used, time_created)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (run_id, nb_code) DO UPDATE SET
                   status = excluded.status,
                   payload = excluded.payload,
                   tokens_used = excluded.tokens_used,
                   time_created = excluded.time_created"#
        )
        .bind(result.run_id.to_string())
        .bind(result.code.to_string())
        .bind(result.status.as_str())
        .bind(&payload_json)
        .bind(i64::from(result.tokens_used))
        .bind(format_datetime(result.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_nb_result(&self, run_id: Uuid, code: NotebookCode) -> DomainResult<Option<StoredNbResult>> {
        let row: Option<NbResultRow> = sqlx::query_as(
            "SELECT * FROM nb_results WHERE run_id = ? AND nb_code = ?"
        )
        .bind(run_id.to_string())
        .bind(code.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_nb_results(&self, run_id: Uuid) -> DomainResult<Vec<StoredNbResult>> {
        let mut conn = self.pool.acquire().await?;
        fetch_nb_results(&mut conn, run_id).await
    }

    async fn upsert_synthesis(&self, record: &SynthesisRecord) -> DomainResult<()> {
        let payload_json = serde_json::to_string(&record.payload)?;

        sqlx::query(
            r#"INSERT INTO synthesis_results (run_id, payload, tokens_used, time_created)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (run_id) DO UPDATE SET
                   payload = excluded.payload,
                   tokens_used = excluded.tokens_used,
                   time_created = excluded.time_created"#
        )
        .bind(record.run_id.to_string())
        .bind(&payload_json)
        .bind(i64::from(record.tokens_used))
        .bind(format_datetime(record.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_synthesis(&self, run_id: Uuid) -> DomainResult<Option<StoredSynthesis>> {
        let mut conn = self.pool.acquire().await?;
        fetch_synthesis(&mut conn, run_id).await
    }

    async fn count_by_category(&self, run_id: Uuid) -> DomainResult<ArtifactCounts> {
        let (nb, synthesis): (i64, i64) = sqlx::query_as(
            r#"SELECT
                   (SELECT COUNT(*) FROM nb_results WHERE run_id = ?1),
                   (SELECT COUNT(*) FROM synthesis_results WHERE run_id = ?1)"#
        )
        .bind(run_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(ArtifactCounts {
            nb: nb.unsigned_abs(),
            synthesis: synthesis.unsigned_abs(),
        })
    }

    async fn purge(&self, run_id: Uuid) -> DomainResult<ArtifactCounts> {
        let mut tx = self.pool.begin().await?;

        let nb = sqlx::query("DELETE FROM nb_results WHERE run_id = ?")
            .bind(run_id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let synthesis = sqlx::query("DELETE FROM synthesis_results WHERE run_id = ?")
            .bind(run_id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(ArtifactCounts { nb, synthesis })
    }
}

/// Load a run's NB results on an existing connection or transaction.
pub(crate) async fn fetch_nb_results(conn: &mut SqliteConnection, run_id: Uuid) -> DomainResult<Vec<StoredNbResult>> {
    let rows: Vec<NbResultRow> = sqlx::query_as(
        // Numeric order: NB2 before NB10.
        "SELECT * FROM nb_results WHERE run_id = ? ORDER BY length(nb_code), nb_code"
    )
    .bind(run_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

/// Load a run's synthesis record on an existing connection or transaction.
pub(crate) async fn fetch_synthesis(conn: &mut SqliteConnection, run_id: Uuid) -> DomainResult<Option<StoredSynthesis>> {
    let row: Option<SynthesisRow> = sqlx::query_as(
        "SELECT * FROM synthesis_results WHERE run_id = ?"
    )
    .bind(run_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(TryInto::try_into).transpose()
}

#[derive(sqlx::FromRow)]
struct NbResultRow {
    run_id: String,
    nb_code: String,
    status: String,
    payload: String,
    tokens_used: i64,
    time_created: String,
}

impl TryFrom<NbResultRow> for StoredNbResult {
    type Error = crate::domain::errors::DomainError;

    fn try_from(row: NbResultRow) -> Result<Self, Self::Error> {
        Ok(StoredNbResult {
            run_id: parse_uuid(&row.run_id)?,
            nb_code: row.nb_code,
            status: row.status,
            payload: row.payload,
            tokens_used: row.tokens_used,
            created_at: parse_datetime(&row.time_created)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SynthesisRow {
    run_id: String,
    payload: String,
    tokens_used: i64,
    time_created: String,
}

impl TryFrom<SynthesisRow> for StoredSynthesis {
    type Error = crate::domain::errors::DomainError;

    fn try_from(row: SynthesisRow) -> Result<Self, Self::Error> {
        Ok(StoredSynthesis {
            run_id: parse_uuid(&row.run_id)?,
            payload: row.payload,
            tokens_used: row.tokens_used,
            created_at: parse_datetime(&row.time_created)?,
        })
    }
}
