//! DNAnexus adapter tests against a wiremock API server

use std::sync::Arc;
use std::time::Duration;

use dxsync::adapters::{
    DnanexusConfig, DnanexusSource, InMemoryLims, MetadataSource, RetryPolicy, Retrying, SourceError,
};
use dxsync::core::{Orchestrator, PassLimits, SyncOptions};
use dxsync::domain::{ErrorKind, FilterCriteria, ImportOutcome, MetadataValue, PassAbort, RecordType, SourceKind};
use futures_util::TryStreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, timeout: Duration) -> DnanexusSource {
    DnanexusSource::new(
        DnanexusConfig {
            api_url: server.uri(),
            token: "dx-token".to_string(),
        },
        timeout,
    )
    .unwrap()
}

async fn setup() -> (MockServer, DnanexusSource) {
    let server = MockServer::start().await;
    let source = client(&server, Duration::from_secs(10));
    (server, source)
}

fn projects(ids: &[&str]) -> FilterCriteria {
    FilterCriteria {
        projects: ids.iter().map(|id| id.to_string()).collect(),
        ..Default::default()
    }
}

async fn mount_project(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/project-1/describe"))
        .and(header("authorization", "Bearer dx-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "project-1",
            "class": "project",
            "name": "Run 1",
            "created": 1_700_000_000_000i64,
            "properties": { "seq_run_name": "RUN_1", "seq_lane_index": "3", "paired": "true" }
        })))
        .mount(server)
        .await;
}

async fn mount_contents(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/system/findAnalyses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "id": "analysis-1",
                "describe": {
                    "name": "align",
                    "executableName": "bwa_mem_fastq_read_mapper",
                    "created": 1_700_000_100_000i64
                }
            }],
            "next": null
        })))
        .mount(server)
        .await;

    // First page, then the continuation
    Mock::given(method("POST"))
        .and(path("/system/findDataObjects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "project": "project-1",
                "id": "file-1",
                "describe": {
                    "name": "S1_R1.fastq.gz",
                    "created": 1_700_000_200_000i64,
                    "properties": { "barcode": "ACGT", "read": "1", "analysis": "analysis-1" }
                }
            }],
            "next": { "project": "project-1", "id": "file-2" }
        })))
        .up_to_n_times(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/system/findDataObjects"))
        .and(body_partial_json(json!({ "starting": { "id": "file-2" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "project": "project-1",
                "id": "file-2",
                "describe": {
                    "name": "S1_R1.bam",
                    "created": 1_700_000_300_000i64,
                    "properties": { "barcode": "ACGT", "read": "1" }
                }
            }],
            "next": null
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_lists_project_contents_across_pages() {
    let (server, source) = setup().await;
    mount_project(&server).await;
    mount_contents(&server).await;

    let filter = projects(&["project-1"]);
    let objects: Vec<_> = source
        .list_candidates(&filter)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    let ids: Vec<&str> = objects.iter().map(|o| o.external_id.as_str()).collect();
    assert_eq!(ids, vec!["project-1", "analysis-1", "file-1", "file-2"]);

    assert_eq!(objects[0].kind, SourceKind::Run);
    assert_eq!(objects[0].meta("seq_lane_index"), Some(&MetadataValue::from("3")));
    assert_eq!(objects[1].parent_id.as_deref(), Some("project-1"));
    assert_eq!(objects[2].parent_id.as_deref(), Some("analysis-1"));
    assert_eq!(objects[3].parent_id.as_deref(), Some("project-1"));
    assert_eq!(objects[3].meta("project"), Some(&MetadataValue::from("project-1")));
}

#[tokio::test]
async fn test_file_patterns_are_applied() {
    let (server, source) = setup().await;
    mount_project(&server).await;
    mount_contents(&server).await;

    let filter = FilterCriteria {
        projects: vec!["project-1".to_string()],
        file_patterns: vec!["*.fastq.gz".to_string()],
        include_analyses: false,
        ..Default::default()
    };
    let objects: Vec<_> = source
        .list_candidates(&filter)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    let ids: Vec<&str> = objects.iter().map(|o| o.external_id.as_str()).collect();
    assert_eq!(ids, vec!["project-1", "file-1"]);
}

#[tokio::test]
async fn test_missing_object_is_not_found() {
    let (server, source) = setup().await;

    Mock::given(method("POST"))
        .and(path("/file-404/describe"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "type": "ResourceNotFound", "message": "file-404 could not be found" }
        })))
        .mount(&server)
        .await;

    let result = source.fetch_metadata("file-404").await;
    assert!(matches!(result, Err(SourceError::NotFound(_))));
}

#[tokio::test]
async fn test_rejected_token_is_fatal() {
    let (server, source) = setup().await;

    Mock::given(method("POST"))
        .and(path("/system/findProjects"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "type": "InvalidAuthentication", "message": "the token could not be found" }
        })))
        .mount(&server)
        .await;

    let filter = FilterCriteria::default();
    let result = source.list_candidates(&filter).await;
    match result {
        Err(e) => assert!(e.is_fatal()),
        Ok(_) => panic!("listing should have failed"),
    }
}

#[tokio::test]
async fn test_server_errors_are_transient() {
    let (server, source) = setup().await;

    Mock::given(method("POST"))
        .and(path("/project-1/describe"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = source.fetch_metadata("project-1").await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_excluded_analyses_are_never_imported() {
    let (server, source) = setup().await;
    mount_project(&server).await;
    mount_contents(&server).await;

    let filter = FilterCriteria {
        include_analyses: false,
        ..projects(&["project-1"])
    };
    let lims = Arc::new(InMemoryLims::new());
    let report = Orchestrator::new(Arc::new(source), lims.clone())
        .run_pass(&filter)
        .await;

    assert!(report.aborted.is_none());
    assert_eq!(report.counts().created, 3);
    assert!(report.outcome_for("analysis-1").is_none());
    assert_eq!(lims.count_for("analysis-1"), 0);
    assert!(lims
        .records()
        .iter()
        .all(|r| r.record_type != RecordType::AnalysisResult));

    // The file naming the analysis hangs off the run instead
    let run = lims.record_for("project-1").unwrap();
    let file = lims.record_for("file-1").unwrap();
    assert_eq!(file.fields["sequencing_run_id"], json!(run.lims_id));
}

#[tokio::test]
async fn test_unreadable_project_does_not_stop_the_others() {
    let (server, source) = setup().await;
    mount_project(&server).await;

    Mock::given(method("POST"))
        .and(path("/project-gone/describe"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "type": "ResourceNotFound", "message": "project-gone could not be found" }
        })))
        .mount(&server)
        .await;

    for route in ["/system/findAnalyses", "/system/findDataObjects"] {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [], "next": null })))
            .mount(&server)
            .await;
    }

    let lims = Arc::new(InMemoryLims::new());
    let report = Orchestrator::new(Arc::new(source), lims.clone())
        .run_pass(&projects(&["project-gone", "project-1"]))
        .await;

    assert!(report.aborted.is_none());
    assert!(matches!(
        report.outcome_for("project-gone").unwrap().outcome,
        ImportOutcome::Failed {
            error_kind: ErrorKind::NotFound,
            ..
        }
    ));
    assert!(matches!(
        report.outcome_for("project-1").unwrap().outcome,
        ImportOutcome::Created { .. }
    ));
    assert_eq!(lims.count_for("project-1"), 1);
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    let source = client(&server, Duration::from_millis(200));

    Mock::given(method("POST"))
        .and(path("/project-1/describe"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "class": "project", "name": "Run 1" }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    assert_eq!(source.fetch_metadata("project-1").await, Err(SourceError::Timeout));
}

#[tokio::test]
async fn test_hung_listing_page_ends_pass_at_timeout() {
    let (server, source) = setup().await;
    mount_project(&server).await;

    Mock::given(method("POST"))
        .and(path("/system/findAnalyses"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "results": [], "next": null }))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let source = Retrying::new(source, RetryPolicy::none(), Duration::from_secs(1));
    let options = SyncOptions {
        limits: PassLimits {
            pass_timeout_seconds: 1,
            ..Default::default()
        },
        ..Default::default()
    };
    let lims = Arc::new(InMemoryLims::new());
    let orchestrator = Orchestrator::new(Arc::new(source), lims.clone()).with_options(options);

    let report = tokio::time::timeout(Duration::from_secs(5), orchestrator.run_pass(&projects(&["project-1"])))
        .await
        .unwrap();

    assert!(matches!(report.aborted, Some(PassAbort::LimitReached { .. })));
    assert!(lims.records().is_empty());
}
