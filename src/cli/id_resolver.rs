//! Short ID prefix resolution for CLI commands.
//!
//! Allows users to specify any unique prefix of a run UUID instead of the
//! full ID, similar to git short hashes.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

const RUN_QUERY: &str = "SELECT id FROM runs WHERE id LIKE ? ORDER BY id LIMIT 11";

/// Resolve a run ID prefix to a full UUID.
pub async fn resolve_run_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    // Fast path: a full UUID is taken as is, existing or not.
    if let Ok(uuid) = Uuid::parse_str(prefix) {
        return Ok(uuid);
    }

    validate_prefix(prefix)?;

    let pattern = format!("{}%", prefix.to_lowercase());
    let rows: Vec<(String,)> = sqlx::query_as(RUN_QUERY)
        .bind(&pattern)
        .fetch_all(pool)
        .await?;

    match rows.len() {
        0 => bail!("No run found matching '{prefix}'"),
        1 => Ok(Uuid::parse_str(&rows[0].0)?),
        n => {
            let shown = if n > 10 { "more than 10".to_string() } else { n.to_string() };
            let mut msg = format!("Ambiguous prefix '{prefix}': matches {shown} runs:");
            for row in rows.iter().take(10) {
                msg.push_str(&format!("\n  {}", row.0));
            }
            bail!("{msg}")
        }
    }
}

fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        bail!("ID prefix must not be empty");
    }
    if !prefix.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        bail!("Invalid ID prefix '{prefix}': must contain only hex characters and dashes");
    }
    Ok(())
}
