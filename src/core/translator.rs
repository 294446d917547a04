//! Translation of platform objects into LIMS field sets.
//!
//! One rule set per object kind. Translation is a pure function of the
//! `SourceObject`: no I/O, no clock, no randomness, so translating the same
//! object twice yields the same draft (and the same fingerprint).

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::{
    ErrorKind, MetadataValue, RecordDraft, RecordFields, RecordType, SourceKind, SourceObject,
    FINGERPRINT_FIELD,
};

/// Platform that produced the data, recorded on every run
pub const DATA_STORAGE_PROVIDER: &str = "DNAnexus";

/// Mapper recorded when an analysis does not name one
pub const DEFAULT_MAPPER: &str = "bwa";

/// Local data-shape errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    #[error("missing required field '{field}'")]
    MissingField { field: String },

    #[error("field '{field}' should be {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: String,
    },

    #[error("field '{field}' has invalid value: {detail}")]
    InvalidValue { field: String, detail: String },
}

impl TranslationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingField { .. } => ErrorKind::MissingField,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::InvalidValue { .. } => ErrorKind::InvalidValue,
        }
    }
}

/// Translate an object into the draft of its LIMS record
pub fn translate(object: &SourceObject) -> Result<RecordDraft, TranslationError> {
    let mut fields = match object.kind {
        SourceKind::Run => run_fields(object)?,
        SourceKind::Analysis => analysis_fields(object)?,
        SourceKind::File => file_fields(object)?,
    };

    let fingerprint = fingerprint(&fields);
    fields.insert(FINGERPRINT_FIELD.to_string(), Value::String(fingerprint));

    Ok(RecordDraft {
        record_type: RecordType::for_kind(object.kind),
        external_id: object.external_id.clone(),
        fields,
    })
}

/// First 16 hex chars of SHA-256 over the canonical JSON of the fields
pub fn fingerprint(fields: &RecordFields) -> String {
    // BTreeMap serializes in key order, so the encoding is canonical
    let canonical = serde_json::to_string(fields).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(&digest[..8])
}

fn run_fields(object: &SourceObject) -> Result<RecordFields, TranslationError> {
    let mut fields = RecordFields::new();
    fields.insert("name".into(), json!(required_string(object, "seq_run_name")?));
    fields.insert("lane".into(), json!(required_integer(object, "seq_lane_index")?));
    fields.insert(
        "library_name".into(),
        json!(optional_string(object, "library_name")?),
    );
    fields.insert(
        "paired_end".into(),
        json!(optional_bool(object, "paired")?.unwrap_or(false)),
    );
    fields.insert("status".into(), json!("finished"));
    fields.insert("data_storage_provider".into(), json!(DATA_STORAGE_PROVIDER));
    fields.insert("project_identifier".into(), json!(object.external_id));
    Ok(fields)
}

fn analysis_fields(object: &SourceObject) -> Result<RecordFields, TranslationError> {
    let mut fields = RecordFields::new();
    fields.insert("name".into(), json!(object.name));
    fields.insert("workflow".into(), json!(required_string(object, "workflow")?));
    fields.insert(
        "mapper".into(),
        json!(optional_string(object, "mapper")?.unwrap_or_else(|| DEFAULT_MAPPER.to_string())),
    );
    fields.insert(
        "pair_aligned_perc".into(),
        percentage(optional_float(object, "pct_reads_aligned_in_pairs")?),
    );
    Ok(fields)
}

fn file_fields(object: &SourceObject) -> Result<RecordFields, TranslationError> {
    let barcode = required_string(object, "barcode")?;
    let read = required_integer(object, "read")?;
    if read != 1 && read != 2 {
        return Err(TranslationError::InvalidValue {
            field: "read".to_string(),
            detail: format!("read number {} should be either 1 or 2", read),
        });
    }

    let project = match optional_string(object, "project")? {
        Some(project) => project,
        None => object
            .parent_id
            .clone()
            .ok_or_else(|| TranslationError::MissingField {
                field: "parent_id".to_string(),
            })?,
    };

    let mut fields = RecordFields::new();
    fields.insert("name".into(), json!(object.name));
    fields.insert("barcode".into(), json!(barcode));
    fields.insert("read_number".into(), json!(read));
    fields.insert(
        format!("read{}_uri", read),
        json!(format!("{}:{}", project, object.external_id)),
    );
    fields.insert(
        format!("read{}_count", read),
        json!(optional_integer(object, "pf_reads")?),
    );
    fields.insert(
        format!("read{}_aligned_perc", read),
        percentage(optional_float(object, "pct_pf_reads_aligned")?),
    );
    Ok(fields)
}

/// Fractions are stored as percentages in the LIMS
fn percentage(fraction: Option<f64>) -> Value {
    match fraction {
        Some(f) => json!(f * 100.0),
        None => Value::Null,
    }
}

fn mismatch(field: &str, expected: &'static str, value: &MetadataValue) -> TranslationError {
    TranslationError::TypeMismatch {
        field: field.to_string(),
        expected,
        found: format!("{} '{}'", value.type_name(), value),
    }
}

fn missing(field: &str) -> TranslationError {
    TranslationError::MissingField {
        field: field.to_string(),
    }
}

fn optional_string(object: &SourceObject, field: &str) -> Result<Option<String>, TranslationError> {
    match object.meta(field) {
        None => Ok(None),
        Some(MetadataValue::String(s)) if s.trim().is_empty() => Ok(None),
        Some(MetadataValue::String(s)) => Ok(Some(s.trim().to_string())),
        Some(other) => Err(mismatch(field, "string", other)),
    }
}

fn required_string(object: &SourceObject, field: &str) -> Result<String, TranslationError> {
    optional_string(object, field)?.ok_or_else(|| missing(field))
}

fn optional_integer(object: &SourceObject, field: &str) -> Result<Option<i64>, TranslationError> {
    match object.meta(field) {
        None => Ok(None),
        Some(MetadataValue::Integer(i)) => Ok(Some(*i)),
        Some(MetadataValue::Float(f)) if f.fract() == 0.0 && f.is_finite() => Ok(Some(*f as i64)),
        Some(MetadataValue::String(s)) if s.trim().is_empty() => Ok(None),
        Some(value @ MetadataValue::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| mismatch(field, "integer", value)),
        Some(other) => Err(mismatch(field, "integer", other)),
    }
}

fn required_integer(object: &SourceObject, field: &str) -> Result<i64, TranslationError> {
    optional_integer(object, field)?.ok_or_else(|| missing(field))
}

fn optional_float(object: &SourceObject, field: &str) -> Result<Option<f64>, TranslationError> {
    let value = match object.meta(field) {
        None => return Ok(None),
        Some(MetadataValue::Float(f)) => *f,
        Some(MetadataValue::Integer(i)) => *i as f64,
        Some(MetadataValue::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(value @ MetadataValue::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| mismatch(field, "float", value))?,
        Some(other) => return Err(mismatch(field, "float", other)),
    };

    if !value.is_finite() {
        return Err(TranslationError::InvalidValue {
            field: field.to_string(),
            detail: format!("{} is not a finite number", value),
        });
    }
    Ok(Some(value))
}

fn optional_bool(object: &SourceObject, field: &str) -> Result<Option<bool>, TranslationError> {
    match object.meta(field) {
        None => Ok(None),
        Some(MetadataValue::Bool(b)) => Ok(Some(*b)),
        Some(value @ MetadataValue::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(mismatch(field, "bool", value)),
        },
        Some(other) => Err(mismatch(field, "bool", other)),
    }
}
