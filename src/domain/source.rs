//! Objects discovered on the execution platform.
//!
//! A `SourceObject` is an immutable snapshot of a run, analysis or output
//! file as the platform described it during the current pass.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use glob::Pattern;
use serde::{Deserialize, Serialize};

/// A run, analysis or file on the execution platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceObject {
    /// Platform-unique identifier (e.g. `project-G5kF...`, `file-G5kQ...`)
    pub external_id: String,

    /// What the object represents
    pub kind: SourceKind,

    /// Display name on the platform
    pub name: String,

    /// Platform properties, keyed by property name
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataValue>,

    /// External id of the containing object, if any
    #[serde(default)]
    pub parent_id: Option<String>,

    /// Creation time on the platform (used for date-range filtering)
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl SourceObject {
    /// Create an object with no metadata and no parent
    pub fn new(external_id: impl Into<String>, kind: SourceKind, name: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            kind,
            name: name.into(),
            metadata: BTreeMap::new(),
            parent_id: None,
            created_at: None,
        }
    }

    /// Set the containing object
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Add one metadata entry
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the platform creation time
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Look up a metadata value
    pub fn meta(&self, key: &str) -> Option<&MetadataValue> {
        self.metadata.get(key)
    }
}

/// Kinds of platform objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A sequencing run (a DNAnexus project)
    Run,

    /// An analysis executed inside a run's project
    Analysis,

    /// An output file (typically a FASTQ)
    File,
}

impl SourceKind {
    /// Processing tier. Parents always have a lower rank than their children.
    pub fn rank(self) -> u8 {
        match self {
            Self::Run => 0,
            Self::Analysis => 1,
            Self::File => 2,
        }
    }

    /// Whether an object of this kind must be linked to a parent record
    pub fn requires_parent(self) -> bool {
        matches!(self, Self::File)
    }

    /// Whether an object of this kind can contain others
    pub fn is_container(self) -> bool {
        !matches!(self, Self::File)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Run => "run",
            Self::Analysis => "analysis",
            Self::File => "file",
        };
        f.write_str(s)
    }
}

/// A scalar metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl MetadataValue {
    /// Name of the variant, used in type-mismatch messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }

    /// Convert a JSON scalar. Arrays, objects and null have no scalar form.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for MetadataValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Which platform objects a pass should consider
///
/// Opaque to the orchestrator: it is handed to the source adapter as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterCriteria {
    /// Project ids to scan (empty = every project visible to the token)
    #[serde(default)]
    pub projects: Vec<String>,

    /// Only objects created at or after this instant
    #[serde(default)]
    pub created_after: Option<DateTime<Utc>>,

    /// Only objects created before this instant
    #[serde(default)]
    pub created_before: Option<DateTime<Utc>>,

    /// Glob patterns for file names (empty = all files)
    #[serde(default)]
    pub file_patterns: Vec<String>,

    /// Whether analyses are listed at all
    #[serde(default = "default_include_analyses")]
    pub include_analyses: bool,
}

fn default_include_analyses() -> bool {
    true
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            projects: Vec::new(),
            created_after: None,
            created_before: None,
            file_patterns: Vec::new(),
            include_analyses: default_include_analyses(),
        }
    }
}

impl FilterCriteria {
    /// Check a file name against the configured patterns
    pub fn matches_file_name(&self, name: &str) -> bool {
        if self.file_patterns.is_empty() {
            return true;
        }
        self.file_patterns
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .any(|p| p.matches(name))
    }

    /// Check a creation time against the date range. Unknown times pass.
    pub fn in_date_range(&self, created_at: Option<DateTime<Utc>>) -> bool {
        let Some(created_at) = created_at else {
            return true;
        };
        if let Some(after) = self.created_after {
            if created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if created_at >= before {
                return false;
            }
        }
        true
    }

    /// Whether a project id is in scope
    pub fn includes_project(&self, project_id: &str) -> bool {
        self.projects.is_empty() || self.projects.iter().any(|p| p == project_id)
    }

    /// Full check of an object against every criterion
    pub fn accepts(&self, object: &SourceObject) -> bool {
        if !self.in_date_range(object.created_at) {
            return false;
        }
        match object.kind {
            SourceKind::Run => self.includes_project(&object.external_id),
            SourceKind::Analysis => self.include_analyses,
            SourceKind::File => self.matches_file_name(&object.name),
        }
    }
}
