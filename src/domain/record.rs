//! Records persisted in the LIMS.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::source::SourceKind;

/// Field set of a LIMS record. Ordered so that serialization is stable.
pub type RecordFields = BTreeMap<String, serde_json::Value>;

/// Identifier assigned by the LIMS on creation
pub type LimsId = String;

/// Field that carries the source fingerprint on every record we create
pub const FINGERPRINT_FIELD: &str = "source_fingerprint";

/// A record as stored in the LIMS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimsRecord {
    /// Primary id in the LIMS
    pub lims_id: LimsId,

    /// Join key back to `SourceObject::external_id`
    pub external_id: String,

    /// Which table/model the record lives in
    pub record_type: RecordType,

    /// Stored fields
    #[serde(default)]
    pub fields: RecordFields,
}

impl LimsRecord {
    /// Fingerprint stored with the record, if it was created by this gateway
    pub fn fingerprint(&self) -> Option<&str> {
        self.fields.get(FINGERPRINT_FIELD).and_then(|v| v.as_str())
    }
}

/// LIMS record types targeted by the import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    /// One row per sequencing run
    SequencingRun,

    /// One row per analysis of a run
    AnalysisResult,

    /// One row per sequencing output file
    SequencingResult,
}

impl RecordType {
    /// Record type that a source kind is imported as
    pub fn for_kind(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Run => Self::SequencingRun,
            SourceKind::Analysis => Self::AnalysisResult,
            SourceKind::File => Self::SequencingResult,
        }
    }

    /// Field a child uses to point at a record of this type
    pub fn link_field(self) -> &'static str {
        match self {
            Self::SequencingRun => "sequencing_run_id",
            Self::AnalysisResult => "analysis_id",
            Self::SequencingResult => "sequencing_result_id",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SequencingRun => "sequencing_run",
            Self::AnalysisResult => "analysis_result",
            Self::SequencingResult => "sequencing_result",
        };
        f.write_str(s)
    }
}

/// Fields ready to be written, produced by the translator
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDraft {
    /// Target record type
    pub record_type: RecordType,

    /// External id the record will carry
    pub external_id: String,

    /// Translated fields (includes the fingerprint)
    pub fields: RecordFields,
}

impl RecordDraft {
    /// Fingerprint computed at translation time
    pub fn fingerprint(&self) -> Option<&str> {
        self.fields.get(FINGERPRINT_FIELD).and_then(|v| v.as_str())
    }

    /// Attach the parent association
    pub fn link_parent(&mut self, parent_type: RecordType, parent_id: &str) {
        self.fields.insert(
            parent_type.link_field().to_string(),
            serde_json::Value::String(parent_id.to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_mapping() {
        assert_eq!(RecordType::for_kind(SourceKind::Run), RecordType::SequencingRun);
        assert_eq!(RecordType::for_kind(SourceKind::Analysis), RecordType::AnalysisResult);
        assert_eq!(RecordType::for_kind(SourceKind::File), RecordType::SequencingResult);
    }

    #[test]
    fn test_link_parent() {
        let mut draft = RecordDraft {
            record_type: RecordType::SequencingResult,
            external_id: "file-1".to_string(),
            fields: RecordFields::new(),
        };
        draft.link_parent(RecordType::SequencingRun, "R1");

        assert_eq!(draft.fields.get("sequencing_run_id"), Some(&serde_json::json!("R1")));
    }
}
