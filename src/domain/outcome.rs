//! Per-object outcomes and the pass report.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::LimsId;
use super::source::SourceKind;

/// Report-facing classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Source object vanished between listing and fetch
    NotFound,

    /// Access to the source object was denied
    Authorization,

    /// LIMS rejected the field set
    Validation,

    /// Required metadata key absent
    MissingField,

    /// Metadata value has the wrong type
    TypeMismatch,

    /// Metadata value has the right type but is out of range
    InvalidValue,

    /// Parent could not be imported before the child
    MissingParent,

    /// Point lookup matched more than one LIMS record
    MultipleHits,

    /// Other source-side failure (transport, timeout)
    Source,

    /// Other LIMS-side failure (transport, timeout)
    Lims,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::Authorization => "authorization",
            Self::Validation => "validation",
            Self::MissingField => "missing_field",
            Self::TypeMismatch => "type_mismatch",
            Self::InvalidValue => "invalid_value",
            Self::MissingParent => "missing_parent",
            Self::MultipleHits => "multiple_hits",
            Self::Source => "source",
            Self::Lims => "lims",
        };
        f.write_str(s)
    }
}

/// Why an object was not written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A record with this external id existed before the write
    AlreadyImported,

    /// Another importer created the record between lookup and write
    ImportedConcurrently,
}

/// Terminal state of one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ImportOutcome {
    /// A new record was written
    Created { lims_id: LimsId },

    /// No write was needed
    Skipped {
        reason: SkipReason,
        lims_id: Option<LimsId>,
    },

    /// The object could not be imported
    Failed { error_kind: ErrorKind, message: String },
}

impl ImportOutcome {
    /// Create a failed outcome
    pub fn failed(error_kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failed {
            error_kind,
            message: message.into(),
        }
    }

    /// LIMS id of the record now representing the object, if known
    pub fn lims_id(&self) -> Option<&str> {
        match self {
            Self::Created { lims_id } => Some(lims_id),
            Self::Skipped { lims_id, .. } => lims_id.as_deref(),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Outcome of one object, with its identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    /// Platform id of the object
    pub external_id: String,

    /// Object kind (absent when the object could not be read at all)
    pub kind: Option<SourceKind>,

    /// What happened
    pub outcome: ImportOutcome,

    /// Set when the object was imported as the parent of this child
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,

    /// The existing record differs from the current platform metadata
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub metadata_drift: bool,
}

impl ItemOutcome {
    /// Create an outcome for an object
    pub fn new(external_id: impl Into<String>, kind: Option<SourceKind>, outcome: ImportOutcome) -> Self {
        Self {
            external_id: external_id.into(),
            kind,
            outcome,
            triggered_by: None,
            metadata_drift: false,
        }
    }
}

/// Why a pass stopped before exhausting its candidates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum PassAbort {
    /// An adapter rejected the whole session (credentials revoked, etc.)
    SessionRejected { message: String },

    /// Candidate enumeration itself failed
    ListingFailed { message: String },

    /// A pass limit was reached
    LimitReached { message: String },
}

impl fmt::Display for PassAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionRejected { message } => write!(f, "session rejected: {}", message),
            Self::ListingFailed { message } => write!(f, "listing failed: {}", message),
            Self::LimitReached { message } => write!(f, "limit reached: {}", message),
        }
    }
}

/// Summary counts of a report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Result of one synchronization pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// Identifier of this pass (for log correlation)
    pub pass_id: Uuid,

    /// When the pass started
    pub started_at: DateTime<Utc>,

    /// When the pass finished
    pub finished_at: Option<DateTime<Utc>>,

    /// Outcomes in completion order
    pub outcomes: Vec<ItemOutcome>,

    /// Set when the pass stopped early
    pub aborted: Option<PassAbort>,
}

impl SyncReport {
    /// Start an empty report
    pub fn new(pass_id: Uuid) -> Self {
        Self {
            pass_id,
            started_at: Utc::now(),
            finished_at: None,
            outcomes: Vec::new(),
            aborted: None,
        }
    }

    /// Count outcomes by terminal state
    pub fn counts(&self) -> SyncCounts {
        let mut counts = SyncCounts::default();
        for item in &self.outcomes {
            match item.outcome {
                ImportOutcome::Created { .. } => counts.created += 1,
                ImportOutcome::Skipped { .. } => counts.skipped += 1,
                ImportOutcome::Failed { .. } => counts.failed += 1,
            }
        }
        counts
    }

    /// Outcome recorded for an external id
    pub fn outcome_for(&self, external_id: &str) -> Option<&ItemOutcome> {
        self.outcomes.iter().find(|o| o.external_id == external_id)
    }

    pub fn created(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, ImportOutcome::Created { .. }))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, ImportOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes.iter().filter(|o| o.outcome.is_failed())
    }

    /// True when the caller should exit with an error status
    pub fn has_errors(&self) -> bool {
        self.aborted.is_some() || self.outcomes.iter().any(|o| o.outcome.is_failed())
    }

    /// Human-readable summary for operators
    pub fn render_summary(&self) -> String {
        let counts = self.counts();
        let mut out = format!(
            "Sync pass {}: {} created, {} skipped, {} failed\n",
            self.pass_id, counts.created, counts.skipped, counts.failed
        );

        let drifted: Vec<&str> = self
            .outcomes
            .iter()
            .filter(|o| o.metadata_drift)
            .map(|o| o.external_id.as_str())
            .collect();
        if !drifted.is_empty() {
            out.push_str(&format!(
                "Metadata changed since import (left unchanged): {}\n",
                drifted.join(", ")
            ));
        }

        if counts.failed > 0 {
            out.push_str("\nFailures:\n");
            for item in self.failed() {
                if let ImportOutcome::Failed { error_kind, message } = &item.outcome {
                    out.push_str(&format!(
                        "  {:<32} {:<16} {}\n",
                        item.external_id, error_kind, message
                    ));
                }
            }
        }

        if let Some(abort) = &self.aborted {
            out.push_str(&format!("\nPass aborted: {}\n", abort));
        }

        out
    }
}

/// Report accumulator shared by concurrent imports
#[derive(Debug)]
pub struct ReportAccumulator {
    report: Mutex<SyncReport>,
}

impl ReportAccumulator {
    pub fn new(pass_id: Uuid) -> Self {
        Self {
            report: Mutex::new(SyncReport::new(pass_id)),
        }
    }

    /// Append one outcome
    pub fn push(&self, item: ItemOutcome) {
        self.lock().outcomes.push(item);
    }

    /// Record an abort. The first reason wins.
    pub fn abort(&self, reason: PassAbort) {
        let mut report = self.lock();
        if report.aborted.is_none() {
            report.aborted = Some(reason);
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().aborted.is_some()
    }

    /// Close the report
    pub fn finish(self) -> SyncReport {
        let mut report = self
            .report
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        report.finished_at = Some(Utc::now());
        report
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SyncReport> {
        // A panic while holding the lock leaves the Vec intact
        self.report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
