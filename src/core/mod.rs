//! Core reconciliation logic.
//!
//! This module contains:
//! - Identity: deduplication against the LIMS and the conflict policy
//! - Translator: per-kind field mapping and validation
//! - Limits: pass timeout and object caps
//! - Orchestrator: the import pipeline

pub mod identity;
pub mod limits;
pub mod orchestrator;
pub mod translator;

// Re-export commonly used types
pub use identity::{IdentityMapper, Lookup, WriteResult};
pub use limits::{LimitViolation, PassLimits, PassTracker};
pub use orchestrator::{Inspection, Orchestrator, SyncError, SyncOptions};
pub use translator::{fingerprint, translate, TranslationError};
