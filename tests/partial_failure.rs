//! Partial Failure Integration Tests
//!
//! One bad object never stops the others; an unusable session stops the
//! pass but keeps everything already done.

mod common;

use std::sync::Arc;

use common::{file, orchestrator, orchestrator_with, run};
use dxsync::adapters::{InMemoryLims, InMemorySource, SourceError};
use dxsync::core::SyncOptions;
use dxsync::domain::{ErrorKind, FilterCriteria, ImportOutcome, PassAbort, SourceKind, SourceObject};

fn failure_kind(outcome: &ImportOutcome) -> Option<ErrorKind> {
    match outcome {
        ImportOutcome::Failed { error_kind, .. } => Some(*error_kind),
        _ => None,
    }
}

#[tokio::test]
async fn test_translation_failure_is_isolated() {
    let lims = Arc::new(InMemoryLims::new());
    let broken = SourceObject::new("run-3", SourceKind::Run, "run-3").with_meta("seq_run_name", "RUN_3");
    let source = InMemorySource::new(vec![run("run-1"), run("run-2"), broken, run("run-4"), run("run-5")]);

    let report = orchestrator(source, &lims)
        .run_pass(&FilterCriteria::default())
        .await;

    assert_eq!(report.outcomes.len(), 5);
    assert_eq!(report.counts().created, 4);
    assert_eq!(
        failure_kind(&report.outcome_for("run-3").unwrap().outcome),
        Some(ErrorKind::MissingField)
    );
    assert!(report.outcome_for("run-4").is_some());
    assert!(report.outcome_for("run-5").is_some());
    assert!(report.aborted.is_none());
    assert!(report.has_errors());

    let summary = report.render_summary();
    assert!(summary.contains("run-3"));
    assert!(summary.contains("missing_field"));
}

#[tokio::test]
async fn test_lims_validation_failure_is_isolated() {
    let lims = Arc::new(InMemoryLims::new().with_rejection("run-2"));
    let source = InMemorySource::new(vec![run("run-1"), run("run-2"), run("run-3")]);

    let report = orchestrator(source, &lims)
        .run_pass(&FilterCriteria::default())
        .await;

    assert_eq!(report.counts().created, 2);
    assert_eq!(
        failure_kind(&report.outcome_for("run-2").unwrap().outcome),
        Some(ErrorKind::Validation)
    );
    assert_eq!(lims.count_for("run-2"), 0);
}

#[tokio::test]
async fn test_out_of_range_read_number() {
    let lims = Arc::new(InMemoryLims::new());
    let source = InMemorySource::new(vec![
        run("run-1"),
        file("file-1", "run-1").with_meta("read", "3"),
        file("file-2", "run-1"),
    ]);

    let report = orchestrator(source, &lims)
        .run_pass(&FilterCriteria::default())
        .await;

    assert_eq!(
        failure_kind(&report.outcome_for("file-1").unwrap().outcome),
        Some(ErrorKind::InvalidValue)
    );
    assert!(matches!(
        report.outcome_for("file-2").unwrap().outcome,
        ImportOutcome::Created { .. }
    ));
}

#[tokio::test]
async fn test_unreadable_listing_entries_are_reported() {
    let lims = Arc::new(InMemoryLims::new());
    let source = InMemorySource::new(vec![run("run-1"), file("file-1", "run-1"), file("file-2", "run-1")])
        .with_item_error("file-2", SourceError::Authorization("file-2".to_string()));

    let report = orchestrator(source, &lims)
        .run_pass(&FilterCriteria::default())
        .await;

    let denied = report.outcome_for("file-2").unwrap();
    assert_eq!(denied.kind, None);
    assert_eq!(failure_kind(&denied.outcome), Some(ErrorKind::Authorization));
    assert_eq!(report.counts().created, 2);
    assert!(report.aborted.is_none());
}

#[tokio::test]
async fn test_session_rejection_aborts_but_keeps_report() {
    let lims = Arc::new(InMemoryLims::new().with_session_rejected_after(1));
    let source = InMemorySource::new(vec![run("run-1"), run("run-2"), run("run-3")]);
    let options = SyncOptions {
        concurrency: 1,
        ..Default::default()
    };

    let report = orchestrator_with(source, &lims, options)
        .run_pass(&FilterCriteria::default())
        .await;

    assert!(matches!(report.aborted, Some(PassAbort::SessionRejected { .. })));
    assert!(matches!(
        report.outcome_for("run-1").unwrap().outcome,
        ImportOutcome::Created { .. }
    ));
    assert!(report.outcome_for("run-2").unwrap().outcome.is_failed());
    assert!(report.outcome_for("run-3").is_none());
    assert!(report.finished_at.is_some());
    assert!(report.has_errors());
    assert_eq!(lims.records().len(), 1);
}

#[tokio::test]
async fn test_listing_failure_aborts_pass() {
    let lims = Arc::new(InMemoryLims::new());
    let source = InMemorySource::new(vec![run("run-1")])
        .with_listing_error(SourceError::Transport("connection reset".to_string()));

    let report = orchestrator(source, &lims)
        .run_pass(&FilterCriteria::default())
        .await;

    assert!(report.outcomes.is_empty());
    assert!(matches!(report.aborted, Some(PassAbort::ListingFailed { .. })));
    assert!(report.has_errors());
    assert_eq!(lims.lookup_calls(), 0);
}
