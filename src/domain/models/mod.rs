pub mod artifact;
pub mod config;
pub mod reuse;
pub mod run;

pub use artifact::{
    ArtifactCategory, ArtifactCounts, ArtifactStatus, Citation, NbPayload, NbResult, NotebookCode,
    StoredNbResult, StoredSynthesis, SynthesisPayload, SynthesisRecord, MAX_NOTEBOOK,
};
pub use config::{CacheConfig, Config, DatabaseConfig, LoggingConfig};
pub use reuse::{ChainBreak, LineageSnapshot, ReuseDecision, ReuseReason, StoredArtifacts};
pub use run::{CompanyPair, ForceFailOutcome, RefreshConfig, Run, RunStatus};
