//! dxsync - DNAnexus to Pulsar LIMS metadata sync
//!
//! Reads sequencing-run, analysis and file metadata from DNAnexus and imports
//! it as records into the Pulsar LIMS. Only metadata moves; data files stay
//! where they are.
//!
//! # Architecture
//!
//! A sync pass is idempotent and create-only:
//! - Every record carries the platform id as its external id
//! - Objects already in the LIMS are skipped, so re-running a pass is a no-op
//! - Parents are imported before children; a child never links to nothing
//! - One object failing never stops the others
//!
//! # Modules
//!
//! - `adapters`: External systems (DNAnexus, Pulsar, in-memory, retry and dry-run wrappers)
//! - `core`: Reconciliation logic (Identity, Translator, Limits, Orchestrator)
//! - `domain`: Data structures (SourceObject, LimsRecord, SyncReport)
//! - `config`: Configuration file and environment
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Import everything new in two projects
//! dxsync sync --project project-G5kF --project project-G5kJ
//!
//! # Preview without writing
//! dxsync sync --since 2024-01-01 --dry-run
//!
//! # Is this file in the LIMS yet?
//! dxsync check file-Fq1
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{LimsError, LimsStore, MetadataSource, SourceError};
pub use core::{Orchestrator, SyncOptions};
pub use domain::{
    FilterCriteria, ImportOutcome, LimsRecord, RecordType, SourceKind, SourceObject, SyncReport,
};
