//! Run CLI commands.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::id_resolver::resolve_run_id;
use crate::cli::output::{format_run_table, output, CommandOutput};
use crate::domain::models::{CompanyPair, Config, ForceFailOutcome, RefreshConfig, Run, RunStatus};
use crate::domain::ports::RunFilter;
use crate::services::RunStatusView;

use super::open_service;

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(subcommand)]
    pub command: RunCommands,
}

#[derive(Subcommand, Debug)]
pub enum RunCommands {
    /// Submit a new run, reusing the latest completed run for the pair when allowed
    Create {
        /// Source company ID
        #[arg(short, long)]
        source: i64,
        /// Target company ID
        #[arg(short, long)]
        target: Option<i64>,
        /// Requesting user ID
        #[arg(long)]
        user: Option<i64>,
        /// Regenerate NB results (and synthesis) even when reusing
        #[arg(long)]
        force_nb_refresh: bool,
        /// Regenerate only the synthesis even when reusing
        #[arg(long)]
        force_synthesis_refresh: bool,
        /// Source company data is being refreshed; skip the cache
        #[arg(long)]
        refresh_source: bool,
        /// Target company data is being refreshed; skip the cache
        #[arg(long)]
        refresh_target: bool,
    },
    /// Show a run's status
    Status {
        /// Run ID or unique prefix
        id: String,
    },
    /// List runs, newest first
    List {
        /// Filter by status (pending, processing, completed, failed)
        #[arg(short, long)]
        status: Option<String>,
        /// Filter by source company ID
        #[arg(long)]
        source: Option<i64>,
        /// Filter by target company ID
        #[arg(long)]
        target: Option<i64>,
        /// Maximum number of runs to display
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },
    /// Move a run to a new status
    Advance {
        /// Run ID or unique prefix
        id: String,
        /// Target status (processing, completed, failed)
        status: String,
    },
    /// Mark an active run failed; terminal runs are left alone
    ForceFail {
        /// Run ID or unique prefix
        id: String,
    },
    /// Claim the oldest pending run for processing
    Claim,
    /// List active runs that have not changed recently
    Stuck {
        /// Idle minutes before a run counts as stuck (defaults to config)
        #[arg(short, long)]
        minutes: Option<u64>,
    },
    /// Show the most recent completed run for a company pair
    Latest {
        /// Source company ID
        #[arg(short, long)]
        source: i64,
        /// Target company ID
        #[arg(short, long)]
        target: Option<i64>,
    },
    /// Delete a run and its artifacts
    Delete {
        /// Run ID or unique prefix
        id: String,
    },
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub id: String,
    pub source_company_id: i64,
    pub target_company_id: Option<i64>,
    pub user_id: Option<i64>,
    pub status: RunStatus,
    pub reused_from_run_id: Option<String>,
    pub regenerate: Vec<String>,
    pub refresh_config: RefreshConfig,
    pub created_at: String,
    pub modified_at: String,
    pub completed_at: Option<String>,
}

impl From<&Run> for RunOutput {
    fn from(run: &Run) -> Self {
        Self {
            id: run.id.to_string(),
            source_company_id: run.pair.source_company_id,
            target_company_id: run.pair.target_company_id,
            user_id: run.user_id,
            status: run.status,
            reused_from_run_id: run.reused_from_run_id.map(|id| id.to_string()),
            regenerate: run.forced_categories.iter().map(ToString::to_string).collect(),
            refresh_config: run.refresh_config,
            created_at: run.created_at.to_rfc3339(),
            modified_at: run.modified_at.to_rfc3339(),
            completed_at: run.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Run: {}", self.id),
            format!(
                "Pair: {}",
                CompanyPair::new(self.source_company_id, self.target_company_id)
            ),
            format!("Status: {}", self.status),
            format!(
                "Reuses: {}",
                self.reused_from_run_id.as_deref().unwrap_or("nothing (full generation)")
            ),
        ];
        if !self.regenerate.is_empty() {
            lines.push(format!("Generates: {}", self.regenerate.join(", ")));
        }
        if let Some(user) = self.user_id {
            lines.push(format!("User: {user}"));
        }
        lines.push(format!("Created: {}", self.created_at));
        if let Some(completed) = &self.completed_at {
            lines.push(format!("Completed: {completed}"));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct RunListOutput {
    #[serde(skip)]
    runs: Vec<Run>,
    pub items: Vec<RunOutput>,
    pub total: usize,
    #[serde(skip)]
    empty_message: &'static str,
}

impl RunListOutput {
    fn new(runs: Vec<Run>, empty_message: &'static str) -> Self {
        Self {
            items: runs.iter().map(RunOutput::from).collect(),
            total: runs.len(),
            runs,
            empty_message,
        }
    }
}

impl CommandOutput for RunListOutput {
    fn to_human(&self) -> String {
        if self.runs.is_empty() {
            return self.empty_message.to_string();
        }
        format!("Found {} run(s):\n{}", self.total, format_run_table(&self.runs))
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct StatusOutput(pub RunStatusView);

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let view = &self.0;
        let mut line = format!("{} {}", view.run_id, view.status);
        if let Some(completed) = view.completed_at {
            line.push_str(&format!(" (completed {})", completed.to_rfc3339()));
        }
        line
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.0).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct ForceFailOutput {
    pub run_id: String,
    #[serde(flatten)]
    pub outcome: ForceFailOutcome,
}

impl CommandOutput for ForceFailOutput {
    fn to_human(&self) -> String {
        match self.outcome {
            ForceFailOutcome::Failed { previous } => {
                format!("Run {} force-failed (was {previous}).", self.run_id)
            }
            ForceFailOutcome::AlreadyTerminal { status } => {
                format!("Run {} is already {status}; nothing changed.", self.run_id)
            }
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct RunActionOutput {
    pub success: bool,
    pub message: String,
    pub run: Option<RunOutput>,
}

impl CommandOutput for RunActionOutput {
    fn to_human(&self) -> String {
        match &self.run {
            Some(run) => format!("{}\n\n{}", self.message, run.to_human()),
            None => self.message.clone(),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn parse_status(value: &str) -> Result<RunStatus> {
    RunStatus::from_str(value).ok_or_else(|| {
        anyhow!("Invalid status: {value}. Must be one of: pending, processing, completed, failed")
    })
}

pub async fn execute(args: RunArgs, config: &Config, json_mode: bool) -> Result<()> {
    let (pool, service) = open_service(config).await?;

    match args.command {
        RunCommands::Create {
            source,
            target,
            user,
            force_nb_refresh,
            force_synthesis_refresh,
            refresh_source,
            refresh_target,
        } => {
            let refresh = RefreshConfig {
                force_nb_refresh,
                force_synthesis_refresh,
                refresh_source,
                refresh_target,
            };
            let run = service.create_run(CompanyPair::new(source, target), refresh, user).await?;

            let out = RunActionOutput {
                success: true,
                message: format!("Run created: {}", run.id),
                run: Some(RunOutput::from(&run)),
            };
            output(&out, json_mode);
        }

        RunCommands::Status { id } => {
            let uuid = resolve_run_id(&pool, &id).await?;
            output(&StatusOutput(service.status(uuid).await?), json_mode);
        }

        RunCommands::List { status, source, target, limit } => {
            let filter = RunFilter {
                status: status.as_deref().map(parse_status).transpose()?,
                source_company_id: source,
                target_company_id: target,
                limit: Some(limit),
            };
            let runs = service.list_runs(filter).await?;
            output(&RunListOutput::new(runs, "No runs found."), json_mode);
        }

        RunCommands::Advance { id, status } => {
            let uuid = resolve_run_id(&pool, &id).await?;
            let run = service.advance(uuid, parse_status(&status)?).await?;

            let out = RunActionOutput {
                success: true,
                message: format!("Run {} is now {}", run.id, run.status),
                run: Some(RunOutput::from(&run)),
            };
            output(&out, json_mode);
        }

        RunCommands::ForceFail { id } => {
            let uuid = resolve_run_id(&pool, &id).await?;
            let outcome = service.force_fail(uuid).await?;
            output(&ForceFailOutput { run_id: uuid.to_string(), outcome }, json_mode);
        }

        RunCommands::Claim => {
            let out = match service.claim_next().await? {
                Some(run) => RunActionOutput {
                    success: true,
                    message: format!("Claimed run {}", run.id),
                    run: Some(RunOutput::from(&run)),
                },
                None => RunActionOutput {
                    success: false,
                    message: "No pending runs.".to_string(),
                    run: None,
                },
            };
            output(&out, json_mode);
        }

        RunCommands::Stuck { minutes } => {
            let runs = service.list_stuck(minutes).await?;
            output(&RunListOutput::new(runs, "No stuck runs."), json_mode);
        }

        RunCommands::Latest { source, target } => {
            let out = match service.latest_completed(CompanyPair::new(source, target)).await? {
                Some(run) => RunActionOutput {
                    success: true,
                    message: "Latest completed run:".to_string(),
                    run: Some(RunOutput::from(&run)),
                },
                None => RunActionOutput {
                    success: false,
                    message: format!(
                        "No completed run for {}",
                        CompanyPair::new(source, target)
                    ),
                    run: None,
                },
            };
            output(&out, json_mode);
        }

        RunCommands::Delete { id } => {
            let uuid = resolve_run_id(&pool, &id).await?;
            service.delete_run(uuid).await?;
            let out = RunActionOutput {
                success: true,
                message: format!("Run deleted: {uuid}"),
                run: None,
            };
            output(&out, json_mode);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("Processing").unwrap(), RunStatus::Processing);
        assert!(parse_status("cancelled").is_err());
    }

    #[test]
    fn test_force_fail_output_json() {
        let out = ForceFailOutput {
            run_id: "r1".to_string(),
            outcome: ForceFailOutcome::AlreadyTerminal { status: RunStatus::Completed },
        };
        let json = out.to_json();
        assert_eq!(json["outcome"], "already_terminal");
        assert_eq!(json["status"], "completed");
        assert!(out.to_human().contains("already completed"));
    }

    #[test]
    fn test_run_output_lists_regenerated_categories() {
        let run = Run::new(CompanyPair::new(1, None), RefreshConfig::default());
        let out = RunOutput::from(&run);
        assert_eq!(out.regenerate, vec!["nb", "synthesis"]);
        assert!(out.to_human().contains("full generation"));
    }
}
