//! Run domain model.
//!
//! A run is one execution of the company-research pipeline for a
//! source/target company pair. Runs move through a strict state machine
//! and may point at an earlier completed run whose cached artifacts they
//! reuse.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifact::ArtifactCategory;
use super::reuse::ReuseDecision;
use crate::domain::errors::{DomainError, DomainResult};

/// Status of a run in the research pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Submitted, waiting for a background worker
    Pending,
    /// Picked up by a background worker
    Processing,
    /// Pipeline finished and artifacts are stable
    Completed,
    /// Pipeline failed or the run was force-failed
    Failed,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> Vec<RunStatus> {
        match self {
            Self::Pending => vec![Self::Processing],
            Self::Processing => vec![Self::Completed, Self::Failed],
            Self::Completed | Self::Failed => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The company pairing a run researches.
///
/// Cache reuse only ever happens between runs with an identical pair,
/// including an identical absence of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompanyPair {
    pub source_company_id: i64,
    pub target_company_id: Option<i64>,
}

impl CompanyPair {
    pub fn new(source_company_id: i64, target_company_id: Option<i64>) -> Self {
        Self {
            source_company_id,
            target_company_id,
        }
    }
}

impl fmt::Display for CompanyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target_company_id {
            Some(target) => write!(f, "{}->{}", self.source_company_id, target),
            None => write!(f, "{}", self.source_company_id),
        }
    }
}

/// User-selected flags controlling which cached artifact categories to bypass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Regenerate NB results even when a prior run is reused
    pub force_nb_refresh: bool,
    /// Regenerate only the synthesis stage, reusing NB results
    pub force_synthesis_refresh: bool,
    /// Source company data must be refetched
    pub refresh_source: bool,
    /// Target company data must be refetched
    pub refresh_target: bool,
}

impl RefreshConfig {
    /// Whether either company's cached data is invalidated by this request.
    pub fn bypasses_company_cache(&self) -> bool {
        self.refresh_source || self.refresh_target
    }
}

/// Result of an administrative force-fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ForceFailOutcome {
    /// The run was active and is now failed.
    Failed { previous: RunStatus },
    /// The run had already finished; nothing was changed.
    AlreadyTerminal { status: RunStatus },
}

/// One research job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier
    pub id: Uuid,
    /// Companies being researched
    pub pair: CompanyPair,
    /// Requesting user, opaque to this crate
    pub user_id: Option<i64>,
    /// Current status
    pub status: RunStatus,
    /// Refresh flags chosen at submission
    pub refresh_config: RefreshConfig,
    /// Completed run whose artifacts this run reuses
    pub reused_from_run_id: Option<Uuid>,
    /// Categories the worker must generate for this run
    pub forced_categories: BTreeSet<ArtifactCategory>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last modified
    pub modified_at: DateTime<Utc>,
    /// When completed; set exactly when status is completed
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a new pending run.
    pub fn new(pair: CompanyPair, refresh_config: RefreshConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            pair,
            user_id: None,
            status: RunStatus::default(),
            refresh_config,
            reused_from_run_id: None,
            forced_categories: ArtifactCategory::all().into_iter().collect(),
            created_at: now,
            modified_at: now,
            completed_at: None,
        }
    }

    /// Set the requesting user.
    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Record the outcome of a cache reuse decision on this run.
    pub fn apply_reuse(&mut self, decision: &ReuseDecision) {
        self.reused_from_run_id = decision.reused_from_run_id;
        self.forced_categories = decision.regenerate.clone();
    }

    /// Check if can transition to given status.
    pub fn can_transition_to(&self, new_status: RunStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to a new status, stamping modification and completion times.
    pub fn transition_to(&mut self, new_status: RunStatus) -> DomainResult<()> {
        if !self.can_transition_to(new_status) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to: new_status,
            });
        }

        let now = Utc::now();
        self.status = new_status;
        self.modified_at = now;
        self.completed_at = (new_status == RunStatus::Completed).then_some(now);
        Ok(())
    }

    /// Administrative override: fail an active run.
    ///
    /// Terminal runs are left untouched and reported as such.
    pub fn force_fail(&mut self) -> ForceFailOutcome {
        if self.status.is_terminal() {
            return ForceFailOutcome::AlreadyTerminal {
                status: self.status,
            };
        }

        let previous = self.status;
        self.status = RunStatus::Failed;
        self.modified_at = Utc::now();
        self.completed_at = None;
        ForceFailOutcome::Failed { previous }
    }

    /// Check if run is terminal.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Validate the record's invariants.
    pub fn validate(&self) -> Result<(), String> {
        if (self.status == RunStatus::Completed) != self.completed_at.is_some() {
            return Err(format!(
                "Run {} has status {} but completion time {:?}",
                self.id, self.status, self.completed_at
            ));
        }
        if self.reused_from_run_id == Some(self.id) {
            return Err("Run cannot reuse its own artifacts".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_run() -> Run {
        Run::new(CompanyPair::new(12, Some(34)), RefreshConfig::default())
    }

    #[test]
    fn test_run_creation() {
        let run = sample_run();
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.completed_at.is_none());
        assert!(run.reused_from_run_id.is_none());
        assert_eq!(run.forced_categories.len(), 2);
        assert!(run.validate().is_ok());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut run = sample_run();

        run.transition_to(RunStatus::Processing).unwrap();
        assert_eq!(run.status, RunStatus::Processing);
        assert!(run.completed_at.is_none());

        run.transition_to(RunStatus::Completed).unwrap();
        assert!(run.completed_at.is_some());
        assert!(run.is_terminal());
        assert!(run.validate().is_ok());
    }

    #[test]
    fn test_cannot_skip_processing() {
        let mut run = sample_run();
        let err = run.transition_to(RunStatus::Completed).unwrap_err();
        assert!(matches!(
            err,
            DomainError::InvalidTransition {
                from: RunStatus::Pending,
                to: RunStatus::Completed
            }
        ));
        assert_eq!(run.status, RunStatus::Pending);
    }

    #[test]
    fn test_completed_cannot_go_back_to_processing() {
        let mut run = sample_run();
        run.transition_to(RunStatus::Processing).unwrap();
        run.transition_to(RunStatus::Completed).unwrap();

        let err = run.transition_to(RunStatus::Processing).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for status in [RunStatus::Completed, RunStatus::Failed] {
            for target in [
                RunStatus::Pending,
                RunStatus::Processing,
                RunStatus::Completed,
                RunStatus::Failed,
            ] {
                assert!(!status.can_transition_to(target), "{status} -> {target}");
            }
        }
    }

    #[test]
    fn test_force_fail_active_run() {
        let mut run = sample_run();
        let outcome = run.force_fail();
        assert_eq!(
            outcome,
            ForceFailOutcome::Failed {
                previous: RunStatus::Pending
            }
        );
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.validate().is_ok());
    }

    #[test]
    fn test_force_fail_completed_is_noop() {
        let mut run = sample_run();
        run.transition_to(RunStatus::Processing).unwrap();
        run.transition_to(RunStatus::Completed).unwrap();
        let before = run.clone();

        let outcome = run.force_fail();
        assert_eq!(
            outcome,
            ForceFailOutcome::AlreadyTerminal {
                status: RunStatus::Completed
            }
        );
        assert_eq!(run, before);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(RunStatus::from_str("Completed"), Some(RunStatus::Completed));
        assert_eq!(RunStatus::from_str("processing"), Some(RunStatus::Processing));
        assert_eq!(RunStatus::from_str("cancelled"), None);
        assert_eq!(RunStatus::from_str("running"), None);
        assert_eq!(RunStatus::from_str("complete"), None);
    }

    #[test]
    fn test_validate_allows_same_source_and_target() {
        let run = Run::new(CompanyPair::new(5, Some(5)), RefreshConfig::default());
        assert!(run.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inconsistent_completion() {
        let mut run = sample_run();
        run.status = RunStatus::Completed;
        assert!(run.validate().is_err());
    }

    #[test]
    fn test_pair_display() {
        assert_eq!(CompanyPair::new(5, Some(9)).to_string(), "5->9");
        assert_eq!(CompanyPair::new(5, None).to_string(), "5");
    }
}
