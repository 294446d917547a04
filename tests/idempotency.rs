//! Idempotency Integration Tests
//!
//! Re-running a pass must never duplicate records, whether the passes run
//! one after another or at the same time.

mod common;

use std::sync::Arc;

use common::{file, orchestrator, run};
use dxsync::adapters::{DryRunLims, InMemoryLims, InMemorySource};
use dxsync::core::{translate, Orchestrator};
use dxsync::domain::{FilterCriteria, ImportOutcome, LimsRecord, RecordType, SkipReason};

#[tokio::test]
async fn test_second_pass_skips_everything() {
    let lims = Arc::new(InMemoryLims::new());
    let objects = vec![run("run-1"), file("file-1", "run-1")];
    let filter = FilterCriteria::default();

    let first = orchestrator(InMemorySource::new(objects.clone()), &lims)
        .run_pass(&filter)
        .await;

    assert_eq!(
        first.outcome_for("run-1").unwrap().outcome,
        ImportOutcome::Created {
            lims_id: "R1".to_string()
        }
    );
    assert_eq!(
        first.outcome_for("file-1").unwrap().outcome,
        ImportOutcome::Created {
            lims_id: "F1".to_string()
        }
    );
    assert!(!first.has_errors());

    let second = orchestrator(InMemorySource::new(objects), &lims)
        .run_pass(&filter)
        .await;

    assert_eq!(second.counts().created, 0);
    assert_eq!(second.counts().skipped, 2);
    assert_eq!(
        second.outcome_for("file-1").unwrap().outcome,
        ImportOutcome::Skipped {
            reason: SkipReason::AlreadyImported,
            lims_id: Some("F1".to_string())
        }
    );
    assert_eq!(lims.create_calls(), 2);
    assert_ne!(first.pass_id, second.pass_id);
}

#[tokio::test]
async fn test_concurrent_passes_create_each_record_once() {
    let lims = Arc::new(InMemoryLims::new());
    let objects = vec![
        run("run-1"),
        file("file-1", "run-1"),
        file("file-2", "run-1"),
        file("file-3", "run-1"),
    ];
    let filter = FilterCriteria::default();

    let a = orchestrator(InMemorySource::new(objects.clone()), &lims);
    let b = orchestrator(InMemorySource::new(objects.clone()), &lims);
    let (report_a, report_b) = tokio::join!(a.run_pass(&filter), b.run_pass(&filter));

    for object in &objects {
        assert_eq!(lims.count_for(&object.external_id), 1, "{}", object.external_id);
    }
    assert_eq!(report_a.counts().created + report_b.counts().created, 4);
    assert!(!report_a.has_errors());
    assert!(!report_b.has_errors());
}

#[tokio::test]
async fn test_lost_race_is_skipped_not_failed() {
    let lims = Arc::new(InMemoryLims::new().with_race("file-1"));
    let source = InMemorySource::new(vec![run("run-1"), file("file-1", "run-1")]);

    let report = orchestrator(source, &lims)
        .run_pass(&FilterCriteria::default())
        .await;

    match &report.outcome_for("file-1").unwrap().outcome {
        ImportOutcome::Skipped {
            reason: SkipReason::ImportedConcurrently,
            lims_id: Some(_),
        } => {}
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!report.has_errors());
    assert_eq!(lims.count_for("file-1"), 1);
}

#[tokio::test]
async fn test_changed_metadata_is_flagged_not_updated() {
    let imported = translate(&run("run-1")).unwrap();
    let lims = Arc::new(InMemoryLims::new().with_record(LimsRecord {
        lims_id: "R7".to_string(),
        external_id: "run-1".to_string(),
        record_type: RecordType::SequencingRun,
        fields: imported.fields.clone(),
    }));
    let changed = run("run-1").with_meta("seq_lane_index", "2");

    let report = orchestrator(InMemorySource::new(vec![changed]), &lims)
        .run_pass(&FilterCriteria::default())
        .await;

    let item = report.outcome_for("run-1").unwrap();
    assert!(item.metadata_drift);
    assert!(matches!(item.outcome, ImportOutcome::Skipped { .. }));
    assert_eq!(lims.record_for("run-1").unwrap().fields, imported.fields);
    assert!(report.render_summary().contains("run-1"));
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let lims = Arc::new(DryRunLims::new(InMemoryLims::new()));
    let source = Arc::new(InMemorySource::new(vec![run("run-1"), file("file-1", "run-1")]));
    let orchestrator = Orchestrator::new(source, lims.clone());

    let report = orchestrator.run_pass(&FilterCriteria::default()).await;

    assert_eq!(report.counts().created, 2);
    assert_eq!(lims.planned_creates(), 2);

    // A real pass afterwards still has everything to do
    let again = orchestrator.run_pass(&FilterCriteria::default()).await;
    assert_eq!(again.counts().created, 2);
}
