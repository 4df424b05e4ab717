//! Cache reuse decision types.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifact::{ArtifactCategory, StoredNbResult, StoredSynthesis};
use super::run::Run;

/// Why a reuse decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReuseReason {
    /// A prior completed run for the pair was selected
    Reused,
    /// No completed run exists for the pair
    NoPriorRun,
    /// Source or target company data was ordered refreshed
    CompanyRefreshRequested,
    /// The candidate's own lineage is broken
    DanglingChain,
    /// The candidate run could not be loaded
    CandidateUnavailable,
}

impl ReuseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reused => "reused",
            Self::NoPriorRun => "no_prior_run",
            Self::CompanyRefreshRequested => "company_refresh_requested",
            Self::DanglingChain => "dangling_chain",
            Self::CandidateUnavailable => "candidate_unavailable",
        }
    }
}

impl fmt::Display for ReuseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the cache reuse decision for a new run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReuseDecision {
    /// Completed run whose artifacts are reused, `None` for full regeneration
    pub reused_from_run_id: Option<Uuid>,
    /// Categories the new run must generate itself
    pub regenerate: BTreeSet<ArtifactCategory>,
    pub reason: ReuseReason,
}

impl ReuseDecision {
    /// Generate everything from scratch.
    pub fn full_regeneration(reason: ReuseReason) -> Self {
        Self {
            reused_from_run_id: None,
            regenerate: ArtifactCategory::all().into_iter().collect(),
            reason,
        }
    }

    /// Reuse `run_id`, regenerating only `regenerate`.
    pub fn reuse(run_id: Uuid, regenerate: BTreeSet<ArtifactCategory>) -> Self {
        Self {
            reused_from_run_id: Some(run_id),
            regenerate,
            reason: ReuseReason::Reused,
        }
    }

    pub fn is_full_regeneration(&self) -> bool {
        self.reused_from_run_id.is_none()
    }
}

/// Where following a run's lineage stopped before reaching its root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "run_id", rename_all = "snake_case")]
pub enum ChainBreak {
    /// A link points at a run that no longer exists
    Missing(Uuid),
    /// A link points back at a run already on the chain
    Cycle(Uuid),
    /// The chain is longer than the configured limit
    TooDeep(Uuid),
}

/// Artifacts a lineage chain serves, undecoded.
///
/// NB results and the synthesis record may come from different runs on the
/// chain; see [`LineageSnapshot::owner_of`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredArtifacts {
    pub nb: Vec<StoredNbResult>,
    pub synthesis: Option<StoredSynthesis>,
}

/// A run together with the chain of runs it reuses artifacts from.
#[derive(Debug, Clone, PartialEq)]
pub struct LineageSnapshot {
    /// Run the walk started from
    pub head: Run,
    /// Runs reached by following `reused_from_run_id` from the head, in order
    pub ancestors: Vec<Run>,
    /// Set when the walk stopped before reaching a run that reuses nothing
    pub chain_break: Option<ChainBreak>,
    /// Artifacts served by the chain, loaded from each category's owner
    pub artifacts: StoredArtifacts,
}

impl LineageSnapshot {
    /// Build a snapshot with no artifacts loaded yet.
    pub fn new(head: Run, ancestors: Vec<Run>, chain_break: Option<ChainBreak>) -> Self {
        Self {
            head,
            ancestors,
            chain_break,
            artifacts: StoredArtifacts::default(),
        }
    }

    /// Every run on the chain, head first.
    pub fn chain(&self) -> impl Iterator<Item = &Run> {
        std::iter::once(&self.head).chain(self.ancestors.iter())
    }

    /// Last run reached by the walk.
    pub fn root(&self) -> &Run {
        self.ancestors.last().unwrap_or(&self.head)
    }

    /// Run that generated `category` for the head.
    ///
    /// That is the first run on the chain that regenerated the category
    /// itself, falling back to the root.
    pub fn owner_of(&self, category: ArtifactCategory) -> &Run {
        self.chain()
            .find(|run| run.forced_categories.contains(&category))
            .unwrap_or_else(|| self.root())
    }

    pub fn is_intact(&self) -> bool {
        self.chain_break.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{CompanyPair, RefreshConfig};

    #[test]
    fn test_full_regeneration_covers_all_categories() {
        let decision = ReuseDecision::full_regeneration(ReuseReason::NoPriorRun);
        assert!(decision.is_full_regeneration());
        assert!(decision.regenerate.contains(&ArtifactCategory::Nb));
        assert!(decision.regenerate.contains(&ArtifactCategory::Synthesis));
    }

    fn run_forcing(categories: &[ArtifactCategory]) -> Run {
        let mut run = Run::new(CompanyPair::new(1, Some(2)), RefreshConfig::default());
        run.forced_categories = categories.iter().copied().collect();
        run
    }

    #[test]
    fn test_owner_of_follows_forced_categories() {
        let root = run_forcing(&[ArtifactCategory::Nb, ArtifactCategory::Synthesis]);
        let middle = run_forcing(&[ArtifactCategory::Synthesis]);
        let head = run_forcing(&[]);

        let snapshot = LineageSnapshot::new(head.clone(), vec![middle.clone(), root.clone()], None);
        assert_eq!(snapshot.owner_of(ArtifactCategory::Nb).id, root.id);
        assert_eq!(snapshot.owner_of(ArtifactCategory::Synthesis).id, middle.id);
        assert_eq!(snapshot.root().id, root.id);
        assert_eq!(snapshot.chain().count(), 3);
        assert!(snapshot.is_intact());
    }

    #[test]
    fn test_owner_of_falls_back_to_root() {
        // Rows written before forced categories were tracked carry none.
        let root = run_forcing(&[]);
        let snapshot = LineageSnapshot::new(run_forcing(&[]), vec![root.clone()], None);
        assert_eq!(snapshot.owner_of(ArtifactCategory::Nb).id, root.id);
    }

    #[test]
    fn test_reuse_keeps_requested_categories() {
        let id = Uuid::new_v4();
        let decision = ReuseDecision::reuse(id, [ArtifactCategory::Synthesis].into_iter().collect());
        assert_eq!(decision.reused_from_run_id, Some(id));
        assert_eq!(decision.regenerate.len(), 1);
        assert_eq!(decision.reason, ReuseReason::Reused);
    }
}
