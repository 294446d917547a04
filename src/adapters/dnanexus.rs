//! DNAnexus adapter.
//!
//! Every DNAnexus API route is a JSON `POST`. A project is a sequencing run;
//! analyses and file data objects inside the project are its children.
//! Project and file properties are free-form string maps and become the
//! object's metadata verbatim.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::domain::{FilterCriteria, MetadataValue, SourceKind, SourceObject};

use super::{CandidateStream, MetadataSource, SourceError};

/// Default public API endpoint
pub const DEFAULT_API_URL: &str = "https://api.dnanexus.com";

/// File property naming the analysis that produced the file
const ANALYSIS_PROPERTY: &str = "analysis";

/// Connection settings for the DNAnexus API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnanexusConfig {
    /// API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// API token
    #[serde(default)]
    pub token: String,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

impl Default for DnanexusConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: String::new(),
        }
    }
}

/// Error body returned by the API
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
}

/// One page of a `find*` route
#[derive(Debug, Deserialize)]
struct FindPage {
    #[serde(default)]
    results: Vec<FindResult>,
    #[serde(default)]
    next: Value,
}

#[derive(Debug, Deserialize)]
struct FindResult {
    id: String,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    describe: Option<Value>,
}

/// Read-only DNAnexus client
pub struct DnanexusSource {
    client: Client,
    config: DnanexusConfig,
}

impl DnanexusSource {
    /// Create a client whose requests give up after `timeout`
    pub fn new(config: DnanexusConfig, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SourceError::Transport(err.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), route)
    }

    async fn post(&self, route: &str, body: Value) -> Result<Value, SourceError> {
        let response = self
            .client
            .post(self.url(route))
            .bearer_auth(&self.config.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Timeout
                } else {
                    SourceError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_str(&text)
                .map_err(|e| SourceError::Protocol(format!("{} returned invalid JSON: {}", route, e)));
        }

        Err(classify(status, &text, route))
    }

    /// Follow `next` cursors until the listing is exhausted
    async fn find_all(&self, route: &str, mut body: Value) -> Result<Vec<FindResult>, SourceError> {
        let mut results = Vec::new();

        loop {
            let page: FindPage = serde_json::from_value(self.post(route, body.clone()).await?)
                .map_err(|e| SourceError::Protocol(format!("{}: {}", route, e)))?;
            results.extend(page.results);

            if page.next.is_null() {
                break;
            }
            body["starting"] = page.next;
        }

        Ok(results)
    }

    /// A configured project. Unreadable projects are reported under their own id.
    async fn describe_project(&self, id: &str) -> Result<SourceObject, SourceError> {
        self.fetch_metadata(id).await.map_err(|e| match e {
            SourceError::NotFound(_) => SourceError::NotFound(id.to_string()),
            SourceError::Authorization(_) => SourceError::Authorization(id.to_string()),
            other => other,
        })
    }

    /// Every visible project, narrowed by creation time
    async fn find_projects(&self, filter: &FilterCriteria) -> Result<Vec<SourceObject>, SourceError> {
        let mut body = json!({
            "level": "VIEW",
            "describe": { "fields": describe_fields() },
        });
        if let Some(created) = created_range(filter) {
            body["created"] = created;
        }

        self.find_all("system/findProjects", body)
            .await?
            .iter()
            .map(|r| object_from_result(r, SourceKind::Run, None))
            .collect()
    }

    /// Analyses and files of one project, in that order
    async fn project_contents(
        &self,
        run: SourceObject,
        filter: &FilterCriteria,
    ) -> Vec<Result<SourceObject, SourceError>> {
        let project_id = run.external_id.clone();
        let mut items = vec![Ok(run)];

        if filter.include_analyses {
            let body = json!({
                "project": project_id,
                "describe": { "fields": describe_fields() },
            });
            match self.find_all("system/findAnalyses", body).await {
                Ok(found) => items.extend(
                    found
                        .iter()
                        .map(|r| object_from_result(r, SourceKind::Analysis, Some(&project_id)))
                        .filter(|o| o.as_ref().map_or(true, |o| filter.accepts(o))),
                ),
                Err(e) => {
                    items.push(Err(e));
                    return items;
                }
            }
        }

        let body = json!({
            "class": "file",
            "scope": { "project": project_id, "recurse": true },
            "describe": { "fields": describe_fields() },
        });
        match self.find_all("system/findDataObjects", body).await {
            Ok(found) => items.extend(
                found
                    .iter()
                    .map(|r| object_from_result(r, SourceKind::File, Some(&project_id)))
                    .map(|o| {
                        // Excluded analyses must not be pulled in as parents
                        o.map(|o| {
                            if filter.include_analyses {
                                o
                            } else {
                                o.with_parent(project_id.clone())
                            }
                        })
                    })
                    .filter(|o| o.as_ref().map_or(true, |o| filter.accepts(o))),
            ),
            Err(e) => items.push(Err(e)),
        }

        debug!(project = %project_id, objects = items.len(), "Project listed");
        items
    }
}

#[async_trait]
impl MetadataSource for DnanexusSource {
    fn name(&self) -> &str {
        "dnanexus"
    }

    async fn list_candidates<'a>(
        &'a self,
        filter: &'a FilterCriteria,
    ) -> Result<CandidateStream<'a>, SourceError> {
        let projects: CandidateStream<'a> = if filter.projects.is_empty() {
            stream::iter(self.find_projects(filter).await?.into_iter().map(Ok)).boxed()
        } else {
            stream::iter(&filter.projects)
                .then(move |id| self.describe_project(id))
                .boxed()
        };

        // Projects are described and listed lazily, one at a time
        let listing = projects
            .then(move |project| async move {
                match project {
                    Ok(run) if filter.accepts(&run) => self.project_contents(run, filter).await,
                    Ok(_) => Vec::new(),
                    Err(e) => vec![Err(e)],
                }
            })
            .flat_map(stream::iter)
            .boxed();

        Ok(listing)
    }

    async fn fetch_metadata(&self, external_id: &str) -> Result<SourceObject, SourceError> {
        let route = format!("{}/describe", external_id);
        let describe = self.post(&route, json!({ "properties": true })).await?;

        let kind = match describe.get("class").and_then(Value::as_str) {
            Some("project") => SourceKind::Run,
            Some("analysis") => SourceKind::Analysis,
            Some("file") => SourceKind::File,
            other => {
                return Err(SourceError::Protocol(format!(
                    "{} has unsupported class {:?}",
                    external_id, other
                )))
            }
        };

        let project = describe
            .get("project")
            .and_then(Value::as_str)
            .map(str::to_string);
        object_from_describe(external_id, kind, &describe, project.as_deref())
    }
}

fn describe_fields() -> Value {
    json!({
        "name": true,
        "properties": true,
        "created": true,
        "executableName": true,
    })
}

/// DNAnexus expresses times as milliseconds since the epoch
fn created_range(filter: &FilterCriteria) -> Option<Value> {
    let mut range = serde_json::Map::new();
    if let Some(after) = filter.created_after {
        range.insert("after".into(), json!(after.timestamp_millis()));
    }
    if let Some(before) = filter.created_before {
        range.insert("before".into(), json!(before.timestamp_millis()));
    }
    (!range.is_empty()).then_some(Value::Object(range))
}

fn object_from_result(
    result: &FindResult,
    kind: SourceKind,
    project: Option<&str>,
) -> Result<SourceObject, SourceError> {
    let describe = result
        .describe
        .as_ref()
        .ok_or_else(|| SourceError::Protocol(format!("{} returned without describe", result.id)))?;
    let project = result.project.as_deref().or(project);
    object_from_describe(&result.id, kind, describe, project)
}

fn object_from_describe(
    id: &str,
    kind: SourceKind,
    describe: &Value,
    project: Option<&str>,
) -> Result<SourceObject, SourceError> {
    let name = describe
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(id)
        .to_string();

    let mut metadata = BTreeMap::new();
    if let Some(props) = describe.get("properties").and_then(Value::as_object) {
        for (key, value) in props {
            if let Some(value) = MetadataValue::from_json(value) {
                metadata.insert(key.clone(), value);
            }
        }
    }

    if kind == SourceKind::Analysis && !metadata.contains_key("workflow") {
        if let Some(executable) = describe.get("executableName").and_then(Value::as_str) {
            metadata.insert("workflow".to_string(), MetadataValue::from(executable));
        }
    }

    let parent_id = match kind {
        SourceKind::Run => None,
        SourceKind::Analysis => project.map(str::to_string),
        SourceKind::File => match metadata.get(ANALYSIS_PROPERTY) {
            Some(MetadataValue::String(analysis)) => Some(analysis.clone()),
            _ => project.map(str::to_string),
        },
    };

    if kind == SourceKind::File {
        if let Some(project) = project {
            metadata
                .entry("project".to_string())
                .or_insert_with(|| MetadataValue::from(project));
        }
    }

    Ok(SourceObject {
        external_id: id.to_string(),
        kind,
        name,
        metadata,
        parent_id,
        created_at: describe
            .get("created")
            .and_then(Value::as_i64)
            .and_then(millis_to_datetime),
    })
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn classify(status: StatusCode, body: &str, route: &str) -> SourceError {
    let api_error = serde_json::from_str::<ApiErrorBody>(body).ok().map(|b| b.error);
    let message = api_error
        .as_ref()
        .map(|e| format!("{}: {}", e.kind, e.message))
        .unwrap_or_else(|| format!("{} returned {}", route, status));

    match (status, api_error.as_ref().map(|e| e.kind.as_str())) {
        (StatusCode::UNAUTHORIZED, _) | (_, Some("InvalidAuthentication")) => {
            SourceError::SessionRejected(message)
        }
        (StatusCode::FORBIDDEN, _) | (_, Some("PermissionDenied")) => SourceError::Authorization(message),
        (StatusCode::NOT_FOUND, _) | (_, Some("ResourceNotFound")) => SourceError::NotFound(message),
        (StatusCode::TOO_MANY_REQUESTS, _) => SourceError::RateLimited,
        (s, _) if s.is_server_error() => SourceError::Transport(message),
        _ => SourceError::Protocol(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_parent_prefers_analysis_property() {
        let describe = json!({
            "name": "ACGT_R1.fastq.gz",
            "properties": { "barcode": "ACGT", "read": "1", "analysis": "analysis-7" },
            "created": 1700000000000i64,
        });
        let object = object_from_describe("file-1", SourceKind::File, &describe, Some("project-1")).unwrap();

        assert_eq!(object.parent_id.as_deref(), Some("analysis-7"));
        assert_eq!(object.meta("project"), Some(&MetadataValue::from("project-1")));
        assert!(object.created_at.is_some());
    }

    #[test]
    fn test_analysis_workflow_from_executable() {
        let describe = json!({ "name": "align", "executableName": "bwa_mem_fastq_read_mapper" });
        let object =
            object_from_describe("analysis-1", SourceKind::Analysis, &describe, Some("project-1")).unwrap();

        assert_eq!(object.parent_id.as_deref(), Some("project-1"));
        assert_eq!(
            object.meta("workflow"),
            Some(&MetadataValue::from("bwa_mem_fastq_read_mapper"))
        );
    }

    #[test]
    fn test_error_classification() {
        let body = r#"{"error": {"type": "ResourceNotFound", "message": "no such project"}}"#;
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, body, "x/describe"),
            SourceError::NotFound(_)
        ));
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, "", "x"),
            SourceError::SessionRejected(_)
        ));
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, "", "x"),
            SourceError::Transport(_)
        ));
    }
}
