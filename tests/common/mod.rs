//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use dxsync::adapters::{InMemoryLims, InMemorySource};
use dxsync::core::{Orchestrator, SyncOptions};
use dxsync::domain::{SourceKind, SourceObject};

/// A run that translates cleanly
pub fn run(id: &str) -> SourceObject {
    SourceObject::new(id, SourceKind::Run, id)
        .with_meta("seq_run_name", format!("RUN_{}", id))
        .with_meta("seq_lane_index", "1")
        .with_meta("paired", "true")
}

/// An analysis inside a run
pub fn analysis(id: &str, run_id: &str) -> SourceObject {
    SourceObject::new(id, SourceKind::Analysis, format!("{} alignment", id))
        .with_parent(run_id)
        .with_meta("workflow", "bwa_mem_fastq_read_mapper")
        .with_meta("pct_reads_aligned_in_pairs", "0.97")
}

/// A read-1 FASTQ inside a run or analysis
pub fn file(id: &str, parent_id: &str) -> SourceObject {
    SourceObject::new(id, SourceKind::File, format!("{}_R1.fastq.gz", id))
        .with_parent(parent_id)
        .with_meta("barcode", "ACGTACGT")
        .with_meta("read", "1")
        .with_meta("pf_reads", "1200000")
}

pub fn orchestrator(source: InMemorySource, lims: &Arc<InMemoryLims>) -> Orchestrator {
    Orchestrator::new(Arc::new(source), lims.clone())
}

pub fn orchestrator_with(
    source: InMemorySource,
    lims: &Arc<InMemoryLims>,
    options: SyncOptions,
) -> Orchestrator {
    orchestrator(source, lims).with_options(options)
}
