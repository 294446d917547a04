//! Domain types for the sync gateway.
//!
//! This module contains the core data structures:
//! - Source: objects discovered on the execution platform
//! - Record: records persisted in the LIMS
//! - Outcome: per-object outcomes and the pass report

pub mod outcome;
pub mod record;
pub mod source;

// Re-export commonly used types
pub use outcome::{
    ErrorKind, ImportOutcome, ItemOutcome, PassAbort, ReportAccumulator, SkipReason, SyncCounts,
    SyncReport,
};
pub use record::{LimsId, LimsRecord, RecordDraft, RecordFields, RecordType, FINGERPRINT_FIELD};
pub use source::{FilterCriteria, MetadataValue, SourceKind, SourceObject};
