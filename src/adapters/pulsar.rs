//! Pulsar LIMS adapter.
//!
//! Pulsar is a Rails application with one REST resource per record type.
//! Every model has a unique `external_id` column, which is what makes
//! concurrent imports detectable: the second create fails with 409 or with
//! a 422 "has already been taken" validation error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::domain::{LimsRecord, RecordFields, RecordType};

use super::{LimsError, LimsStore};

/// Validation message Rails emits for a uniqueness violation
const UNIQUENESS_MESSAGE: &str = "has already been taken";

/// Connection settings for the Pulsar API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PulsarConfig {
    /// Base URL of the Pulsar instance
    #[serde(default)]
    pub api_url: String,

    /// API key, sent as `Authorization: Token token=<key>`
    #[serde(default)]
    pub api_key: String,
}

/// Route and parameter names of one record type
struct Resource {
    collection: &'static str,
    model: &'static str,
}

fn resource(record_type: RecordType) -> Resource {
    match record_type {
        RecordType::SequencingRun => Resource {
            collection: "sequencing_runs",
            model: "sequencing_run",
        },
        RecordType::AnalysisResult => Resource {
            collection: "analyses",
            model: "analysis",
        },
        RecordType::SequencingResult => Resource {
            collection: "sequencing_results",
            model: "sequencing_result",
        },
    }
}

/// Pulsar REST client
pub struct PulsarLims {
    client: Client,
    config: PulsarConfig,
}

impl PulsarLims {
    /// Create a client whose requests give up after `timeout`
    pub fn new(config: PulsarConfig, timeout: Duration) -> Result<Self, LimsError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| LimsError::Transport(err.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<(StatusCode, String), LimsError> {
        let response = self
            .client
            .post(self.url(path))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Token token={}", self.config.api_key),
            )
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LimsError::Timeout
                } else {
                    LimsError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LimsError::Transport(e.to_string()))?;
        Ok((status, text))
    }
}

#[async_trait]
impl LimsStore for PulsarLims {
    fn name(&self) -> &str {
        "pulsar"
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
        record_type: RecordType,
    ) -> Result<Option<LimsRecord>, LimsError> {
        let resource = resource(record_type);
        let body = json!({ "find_by": { "external_id": external_id } });
        let (status, text) = self
            .post(&format!("{}/find_by", resource.collection), &body)
            .await?;

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(classify(status, &text, external_id));
        }

        let found: Value = serde_json::from_str(&text)
            .map_err(|e| LimsError::Protocol(format!("find_by returned invalid JSON: {}", e)))?;

        let record = match found {
            Value::Null => None,
            Value::Array(mut hits) => match hits.len() {
                0 => None,
                1 => hits.pop(),
                count => {
                    return Err(LimsError::MultipleHits {
                        external_id: external_id.to_string(),
                        count,
                    })
                }
            },
            other => Some(other),
        };

        debug!(external_id, record_type = %record_type, found = record.is_some(), "Pulsar lookup");
        record
            .map(|value| record_from_json(value, external_id, record_type))
            .transpose()
    }

    async fn create(
        &self,
        record_type: RecordType,
        external_id: &str,
        fields: &RecordFields,
    ) -> Result<LimsRecord, LimsError> {
        let resource = resource(record_type);

        let mut attributes = serde_json::Map::new();
        for (key, value) in fields {
            attributes.insert(key.clone(), value.clone());
        }
        attributes.insert("external_id".to_string(), json!(external_id));
        let body = json!({ resource.model: attributes });

        let (status, text) = self.post(resource.collection, &body).await?;
        if !status.is_success() {
            return Err(classify(status, &text, external_id));
        }

        let created: Value = serde_json::from_str(&text)
            .map_err(|e| LimsError::Protocol(format!("create returned invalid JSON: {}", e)))?;
        record_from_json(created, external_id, record_type)
    }
}

fn record_from_json(
    value: Value,
    external_id: &str,
    record_type: RecordType,
) -> Result<LimsRecord, LimsError> {
    let Value::Object(mut object) = value else {
        return Err(LimsError::Protocol(format!(
            "{} record for {} is not an object",
            record_type, external_id
        )));
    };

    let lims_id = match object.remove("id") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s,
        _ => {
            return Err(LimsError::Protocol(format!(
                "{} record for {} has no id",
                record_type, external_id
            )))
        }
    };

    let external_id = match object.remove("external_id") {
        Some(Value::String(s)) => s,
        _ => external_id.to_string(),
    };

    Ok(LimsRecord {
        lims_id,
        external_id,
        record_type,
        fields: object.into_iter().collect(),
    })
}

fn classify(status: StatusCode, body: &str, external_id: &str) -> LimsError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            LimsError::SessionRejected(format!("Pulsar returned {}", status))
        }
        StatusCode::CONFLICT => LimsError::Conflict {
            external_id: external_id.to_string(),
        },
        StatusCode::UNPROCESSABLE_ENTITY if body.contains(UNIQUENESS_MESSAGE) => LimsError::Conflict {
            external_id: external_id.to_string(),
        },
        StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => {
            LimsError::Validation(body.trim().to_string())
        }
        StatusCode::TOO_MANY_REQUESTS => LimsError::RateLimited,
        s if s.is_server_error() => LimsError::Transport(format!("Pulsar returned {}", s)),
        s => LimsError::Protocol(format!("Pulsar returned {}: {}", s, body.trim())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniqueness_violation_is_conflict() {
        let body = r#"{"external_id":["has already been taken"]}"#;
        assert!(matches!(
            classify(StatusCode::UNPROCESSABLE_ENTITY, body, "file-1"),
            LimsError::Conflict { .. }
        ));
        assert!(matches!(
            classify(StatusCode::UNPROCESSABLE_ENTITY, r#"{"barcode":["can't be blank"]}"#, "file-1"),
            LimsError::Validation(_)
        ));
    }

    #[test]
    fn test_record_from_json() {
        let value = json!({ "id": 42, "external_id": "project-1", "name": "RUN_1", "lane": 1 });
        let record = record_from_json(value, "project-1", RecordType::SequencingRun).unwrap();

        assert_eq!(record.lims_id, "42");
        assert_eq!(record.external_id, "project-1");
        assert_eq!(record.fields.get("name"), Some(&json!("RUN_1")));
        assert!(!record.fields.contains_key("id"));
    }
}
