//! Cached artifact models.
//!
//! A run owns at most one NB result per notebook code and at most one
//! synthesis record. Payloads follow one explicit JSON schema each; rows
//! are loaded raw and decoded on demand so a corrupt payload can be
//! treated as a missing artifact instead of failing the whole lookup.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Highest notebook number produced by the research pipeline.
pub const MAX_NOTEBOOK: u8 = 15;

/// Category of cached artifact a run can reuse or regenerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactCategory {
    /// Per-notebook research results
    Nb,
    /// Final report composed from NB results
    Synthesis,
}

impl ArtifactCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nb => "nb",
            Self::Synthesis => "synthesis",
        }
    }

    pub fn all() -> [ArtifactCategory; 2] {
        [Self::Nb, Self::Synthesis]
    }
}

impl fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag identifying a research sub-task, `NB1` through `NB15`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NotebookCode(u8);

impl NotebookCode {
    pub fn new(number: u8) -> DomainResult<Self> {
        if (1..=MAX_NOTEBOOK).contains(&number) {
            Ok(Self(number))
        } else {
            Err(DomainError::ValidationFailed(format!(
                "Notebook number {number} out of range 1-{MAX_NOTEBOOK}"
            )))
        }
    }

    pub fn number(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for NotebookCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NB{}", self.0)
    }
}

impl FromStr for NotebookCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::ValidationFailed(format!("Invalid notebook code: {s}"));
        let trimmed = s.trim();

        let digits = trimmed
            .get(..2)
            .filter(|prefix| prefix.eq_ignore_ascii_case("nb"))
            .and_then(|_| trimmed.get(2..))
            .ok_or_else(invalid)?;

        let number = digits.parse::<u8>().map_err(|_| invalid())?;
        Self::new(number)
    }
}

impl TryFrom<String> for NotebookCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NotebookCode> for String {
    fn from(code: NotebookCode) -> Self {
        code.to_string()
    }
}

/// Outcome recorded for an NB result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Completed,
    Failed,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source cited by an NB result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Citation {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

/// Structured output of one notebook.
///
/// `fields` carries the notebook's named outputs and `citations` the
/// sources backing them. No other top-level keys are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NbPayload {
    pub fields: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

impl NbPayload {
    /// Parse and validate a stored JSON payload.
    pub fn decode(raw: &str) -> Result<Self, String> {
        let payload: Self = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(key) = self.fields.keys().find(|k| k.trim().is_empty()) {
            return Err(format!("Field name cannot be blank: {key:?}"));
        }
        if let Some(idx) = self.citations.iter().position(|c| c.url.trim().is_empty()) {
            return Err(format!("Citation {idx} has an empty url"));
        }
        Ok(())
    }
}

/// Structured output of the synthesis stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SynthesisPayload {
    pub sections: BTreeMap<String, String>,
}

impl SynthesisPayload {
    /// Parse and validate a stored JSON payload.
    pub fn decode(raw: &str) -> Result<Self, String> {
        let payload: Self = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sections.is_empty() {
            return Err("Synthesis must contain at least one section".to_string());
        }
        Ok(())
    }
}

/// A decoded NB result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NbResult {
    pub run_id: Uuid,
    pub code: NotebookCode,
    pub status: ArtifactStatus,
    pub payload: NbPayload,
    pub tokens_used: u32,
    pub created_at: DateTime<Utc>,
}

impl NbResult {
    pub fn new(run_id: Uuid, code: NotebookCode, payload: NbPayload) -> Self {
        Self {
            run_id,
            code,
            status: ArtifactStatus::Completed,
            payload,
            tokens_used: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_tokens(mut self, tokens_used: u32) -> Self {
        self.tokens_used = tokens_used;
        self
    }

    pub fn with_status(mut self, status: ArtifactStatus) -> Self {
        self.status = status;
        self
    }
}

/// A decoded synthesis record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRecord {
    pub run_id: Uuid,
    pub payload: SynthesisPayload,
    pub tokens_used: u32,
    pub created_at: DateTime<Utc>,
}

impl SynthesisRecord {
    pub fn new(run_id: Uuid, payload: SynthesisPayload) -> Self {
        Self {
            run_id,
            payload,
            tokens_used: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_tokens(mut self, tokens_used: u32) -> Self {
        self.tokens_used = tokens_used;
        self
    }
}

/// An NB result row as stored, before payload validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredNbResult {
    pub run_id: Uuid,
    pub nb_code: String,
    pub status: String,
    pub payload: String,
    pub tokens_used: i64,
    pub created_at: DateTime<Utc>,
}

impl StoredNbResult {
    pub fn decode(&self) -> DomainResult<NbResult> {
        let decode_err = |reason: String| DomainError::ArtifactDecodeError {
            run_id: self.run_id,
            category: ArtifactCategory::Nb,
            reason,
        };

        let code = self
            .nb_code
            .parse::<NotebookCode>()
            .map_err(|e| decode_err(e.to_string()))?;
        let status = ArtifactStatus::from_str(&self.status)
            .ok_or_else(|| decode_err(format!("Invalid status: {}", self.status)))?;
        let payload = NbPayload::decode(&self.payload).map_err(decode_err)?;
        let tokens_used = u32::try_from(self.tokens_used)
            .map_err(|_| decode_err(format!("Invalid token count: {}", self.tokens_used)))?;

        Ok(NbResult {
            run_id: self.run_id,
            code,
            status,
            payload,
            tokens_used,
            created_at: self.created_at,
        })
    }
}

/// A synthesis row as stored, before payload validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSynthesis {
    pub run_id: Uuid,
    pub payload: String,
    pub tokens_used: i64,
    pub created_at: DateTime<Utc>,
}

impl StoredSynthesis {
    pub fn decode(&self) -> DomainResult<SynthesisRecord> {
        let decode_err = |reason: String| DomainError::ArtifactDecodeError {
            run_id: self.run_id,
            category: ArtifactCategory::Synthesis,
            reason,
        };

        let payload = SynthesisPayload::decode(&self.payload).map_err(decode_err)?;
        let tokens_used = u32::try_from(self.tokens_used)
            .map_err(|_| decode_err(format!("Invalid token count: {}", self.tokens_used)))?;

        Ok(SynthesisRecord {
            run_id: self.run_id,
            payload,
            tokens_used,
            created_at: self.created_at,
        })
    }
}

/// Artifact counts for one run, by category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactCounts {
    pub nb: u64,
    pub synthesis: u64,
}

impl ArtifactCounts {
    pub fn total(&self) -> u64 {
        self.nb + self.synthesis
    }
}
