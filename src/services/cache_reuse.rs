//! Cache reuse policy.
//!
//! Decides, for a newly requested run, whether it may reuse the artifacts of
//! the most recent completed run for the same company pair and which
//! artifact categories it still has to generate itself. The decision is a
//! pure function of the refresh flags and the lineage snapshot the
//! repository found; persistence happens in the repository transaction that
//! calls it.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ArtifactCategory, ArtifactStatus, ChainBreak, LineageSnapshot, RefreshConfig, ReuseDecision,
    ReuseReason, RunStatus,
};

/// Reuse policy for new runs.
#[derive(Debug, Clone, Copy)]
pub struct CacheReusePolicy {
    max_lineage_depth: u32,
}

impl Default for CacheReusePolicy {
    fn default() -> Self {
        Self::new(8)
    }
}

impl CacheReusePolicy {
    pub fn new(max_lineage_depth: u32) -> Self {
        Self { max_lineage_depth }
    }

    pub fn max_lineage_depth(&self) -> u32 {
        self.max_lineage_depth
    }

    /// Decide reuse for a run submitted with `refresh`.
    ///
    /// Never fails: an unreadable candidate or a broken chain degrades to
    /// full regeneration and is logged.
    pub fn decide(
        &self,
        refresh: &RefreshConfig,
        lookup: DomainResult<Option<LineageSnapshot>>,
    ) -> ReuseDecision {
        // Every cached run predates a company data refresh.
        if refresh.bypasses_company_cache() {
            debug!(?refresh, "company refresh requested, skipping cache");
            return ReuseDecision::full_regeneration(ReuseReason::CompanyRefreshRequested);
        }

        let snapshot = match lookup {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return ReuseDecision::full_regeneration(ReuseReason::NoPriorRun),
            Err(err) => {
                warn!(error = %err, "reuse candidate could not be loaded, regenerating");
                return ReuseDecision::full_regeneration(ReuseReason::CandidateUnavailable);
            }
        };

        if let Err(err) = self.check_chain(&snapshot) {
            warn!(error = %err, "reuse candidate rejected, regenerating");
            return ReuseDecision::full_regeneration(ReuseReason::DanglingChain);
        }

        let mut regenerate = requested_categories(refresh);
        regenerate.extend(invalid_categories(&snapshot));

        debug!(
            candidate = %snapshot.head.id,
            regenerate = ?regenerate,
            "reusing prior run"
        );
        ReuseDecision::reuse(snapshot.head.id, regenerate)
    }

    /// Verify the candidate and every run it reuses from are completed and the
    /// walk reached a run that reuses nothing.
    pub fn check_chain(&self, snapshot: &LineageSnapshot) -> DomainResult<()> {
        self.check_lineage(snapshot)?;

        let head = &snapshot.head;
        if head.status != RunStatus::Completed {
            return Err(DomainError::DanglingCacheChain {
                run_id: head.id,
                reason: format!("run {} is {}", head.id, head.status),
            });
        }
        Ok(())
    }

    /// Verify the runs the head reuses from, whatever the head's own status.
    pub fn check_lineage(&self, snapshot: &LineageSnapshot) -> DomainResult<()> {
        let dangling = |reason: String| DomainError::DanglingCacheChain {
            run_id: snapshot.head.id,
            reason,
        };

        if let Some(chain_break) = snapshot.chain_break {
            return Err(dangling(match chain_break {
                ChainBreak::Missing(id) => format!("run {id} no longer exists"),
                ChainBreak::Cycle(id) => format!("run {id} appears twice"),
                ChainBreak::TooDeep(id) => format!(
                    "more than {} hops before run {id}",
                    self.max_lineage_depth
                ),
            }));
        }

        if snapshot.ancestors.len() > self.max_lineage_depth as usize {
            return Err(dangling(format!(
                "{} hops exceeds limit of {}",
                snapshot.ancestors.len(),
                self.max_lineage_depth
            )));
        }

        let unfinished = snapshot
            .ancestors
            .iter()
            .find(|run| run.status != RunStatus::Completed);
        if let Some(run) = unfinished {
            return Err(dangling(format!("run {} is {}", run.id, run.status)));
        }

        Ok(())
    }
}

/// Categories the user explicitly asked to regenerate.
fn requested_categories(refresh: &RefreshConfig) -> BTreeSet<ArtifactCategory> {
    let mut categories = BTreeSet::new();
    if refresh.force_nb_refresh {
        // Synthesis is composed from the NB outputs.
        categories.insert(ArtifactCategory::Nb);
        categories.insert(ArtifactCategory::Synthesis);
    }
    if refresh.force_synthesis_refresh {
        categories.insert(ArtifactCategory::Synthesis);
    }
    categories
}

/// Categories whose cached artifacts are missing or fail to decode.
///
/// Each category is judged on its own artifacts; a bad NB set does not
/// discard a decodable synthesis.
fn invalid_categories(snapshot: &LineageSnapshot) -> BTreeSet<ArtifactCategory> {
    let mut categories = BTreeSet::new();
    let artifacts = &snapshot.artifacts;

    let nb_usable = !artifacts.nb.is_empty()
        && artifacts.nb.iter().all(|stored| match stored.decode() {
            Ok(result) => result.status == ArtifactStatus::Completed,
            Err(err) => {
                warn!(error = %err, nb_code = %stored.nb_code, "cached NB result unusable");
                false
            }
        });
    if !nb_usable {
        categories.insert(ArtifactCategory::Nb);
    }

    let synthesis_usable = match &artifacts.synthesis {
        Some(stored) => match stored.decode() {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "cached synthesis unusable");
                false
            }
        },
        None => false,
    };
    if !synthesis_usable {
        categories.insert(ArtifactCategory::Synthesis);
    }

    categories
}
