//! Cache CLI commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use tokio::io::AsyncReadExt;

use crate::cli::id_resolver::resolve_run_id;
use crate::cli::output::{output, short_id, CommandOutput};
use crate::domain::models::{
    ArtifactCounts, ArtifactStatus, Config, NbPayload, NbResult, NotebookCode, SynthesisPayload,
    SynthesisRecord,
};
use crate::services::{CacheInspection, CategoryInspection};

use super::open_service;

#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show where a run's artifacts come from and whether they are usable
    Inspect {
        /// Run ID or unique prefix
        id: String,
    },
    /// Record an NB result for a processing run
    PutNb {
        /// Run ID or unique prefix
        id: String,
        /// Notebook code (NB1..NB15)
        code: NotebookCode,
        /// JSON payload file, or - for stdin
        payload: PathBuf,
        /// Tokens spent producing the result
        #[arg(long, default_value = "0")]
        tokens: u32,
        /// Outcome of the notebook (completed, failed)
        #[arg(long, default_value = "completed", value_parser = parse_artifact_status)]
        status: ArtifactStatus,
    },
    /// Show the NB result a run serves, wherever on its lineage it is stored
    ShowNb {
        /// Run ID or unique prefix
        id: String,
        /// Notebook code (NB1..NB15)
        code: NotebookCode,
    },
    /// Show the synthesis a run serves
    ShowSynthesis {
        /// Run ID or unique prefix
        id: String,
    },
    /// Record the synthesis for a processing run
    PutSynthesis {
        /// Run ID or unique prefix
        id: String,
        /// JSON payload file, or - for stdin
        payload: PathBuf,
        /// Tokens spent producing the synthesis
        #[arg(long, default_value = "0")]
        tokens: u32,
    },
    /// Delete every artifact a run holds
    Purge {
        /// Run ID or unique prefix
        id: String,
    },
}

#[derive(Debug, Serialize)]
pub struct InspectOutput(pub CacheInspection);

fn describe_category(name: &str, category: &CategoryInspection) -> String {
    let source = match (category.regenerated, category.owner_run_id) {
        (true, _) => "generated by this run".to_string(),
        (false, Some(owner)) => format!("reused from {}", short_id(&owner)),
        (false, None) => "unavailable".to_string(),
    };
    let mut line = format!("{name}: {source}, {} stored", category.stored);
    if category.undecodable > 0 {
        line.push_str(&format!(", {} undecodable", category.undecodable));
    }
    line
}

impl CommandOutput for InspectOutput {
    fn to_human(&self) -> String {
        let inspection = &self.0;
        let lineage = inspection
            .lineage
            .iter()
            .map(short_id)
            .collect::<Vec<_>>()
            .join(" -> ");

        let mut lines = vec![
            format!("Run: {} ({})", inspection.run_id, inspection.status),
            format!("Lineage: {lineage}"),
        ];
        match &inspection.lineage_problem {
            Some(problem) => lines.push(format!("Lineage broken: {problem}")),
            None => lines.push("Lineage intact".to_string()),
        }
        lines.push(describe_category("NB", &inspection.nb));
        lines.push(describe_category("Synthesis", &inspection.synthesis));
        lines.push(format!(
            "Held by this run: {} artifact(s) ({} NB, {} synthesis)",
            inspection.held.total(),
            inspection.held.nb,
            inspection.held.synthesis
        ));
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.0).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ArtifactOutput {
    Nb(NbResult),
    Synthesis(SynthesisRecord),
}

impl CommandOutput for ArtifactOutput {
    fn to_human(&self) -> String {
        let (header, body) = match self {
            Self::Nb(result) => (
                format!(
                    "{} of run {} ({}, {} tokens)",
                    result.code, result.run_id, result.status, result.tokens_used
                ),
                serde_json::to_string_pretty(&result.payload),
            ),
            Self::Synthesis(record) => (
                format!("Synthesis of run {} ({} tokens)", record.run_id, record.tokens_used),
                serde_json::to_string_pretty(&record.payload),
            ),
        };
        format!("{header}\n{}", body.unwrap_or_default())
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct CacheActionOutput {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<ArtifactCounts>,
}

impl CommandOutput for CacheActionOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn parse_artifact_status(value: &str) -> Result<ArtifactStatus, String> {
    ArtifactStatus::from_str(value)
        .ok_or_else(|| format!("Invalid status: {value}. Must be one of: completed, failed"))
}

async fn read_payload(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("Failed to read payload from stdin")?;
        return Ok(buf);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read payload file {}", path.display()))
}

pub async fn execute(args: CacheArgs, config: &Config, json_mode: bool) -> Result<()> {
    let (pool, service) = open_service(config).await?;

    match args.command {
        CacheCommands::Inspect { id } => {
            let uuid = resolve_run_id(&pool, &id).await?;
            output(&InspectOutput(service.inspect_cache(uuid).await?), json_mode);
        }

        CacheCommands::PutNb { id, code, payload, tokens, status } => {
            let uuid = resolve_run_id(&pool, &id).await?;
            let raw = read_payload(&payload).await?;
            let payload: NbPayload =
                serde_json::from_str(&raw).context("NB payload does not match the expected schema")?;

            let result = service.record_nb_result(uuid, code, status, payload, tokens).await?;
            let out = CacheActionOutput {
                success: true,
                message: format!(
                    "Recorded {} ({}) for run {}",
                    result.code, result.status, result.run_id
                ),
                removed: None,
            };
            output(&out, json_mode);
        }

        CacheCommands::ShowNb { id, code } => {
            let uuid = resolve_run_id(&pool, &id).await?;
            output(&ArtifactOutput::Nb(service.nb_result(uuid, code).await?), json_mode);
        }

        CacheCommands::ShowSynthesis { id } => {
            let uuid = resolve_run_id(&pool, &id).await?;
            output(&ArtifactOutput::Synthesis(service.synthesis(uuid).await?), json_mode);
        }

        CacheCommands::PutSynthesis { id, payload, tokens } => {
            let uuid = resolve_run_id(&pool, &id).await?;
            let raw = read_payload(&payload).await?;
            let payload: SynthesisPayload = serde_json::from_str(&raw)
                .context("Synthesis payload does not match the expected schema")?;

            let record = service.record_synthesis(uuid, payload, tokens).await?;
            let out = CacheActionOutput {
                success: true,
                message: format!("Recorded synthesis for run {}", record.run_id),
                removed: None,
            };
            output(&out, json_mode);
        }

        CacheCommands::Purge { id } => {
            let uuid = resolve_run_id(&pool, &id).await?;
            let removed = service.purge_artifacts(uuid).await?;
            let out = CacheActionOutput {
                success: true,
                message: format!(
                    "Purged {} artifact(s) from run {uuid}: {} NB result(s), {} synthesis record(s)",
                    removed.total(),
                    removed.nb,
                    removed.synthesis
                ),
                removed: Some(removed),
            };
            output(&out, json_mode);
        }
    }

    Ok(())
}
