//! Adapter interfaces for external systems.
//!
//! Two seams: the execution platform the metadata is read from, and the
//! LIMS the records are written to. The orchestrator only ever talks to these
//! traits; concrete clients live in the submodules.

pub mod dnanexus;
pub mod dry_run;
pub mod memory;
pub mod pulsar;
pub mod retry;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::domain::{ErrorKind, FilterCriteria, LimsRecord, RecordFields, RecordType, SourceObject};

// Re-export the concrete adapters
pub use dnanexus::{DnanexusConfig, DnanexusSource};
pub use dry_run::DryRunLims;
pub use memory::{InMemoryLims, InMemorySource};
pub use pulsar::{PulsarConfig, PulsarLims};
pub use retry::{RetryPolicy, Retrying};

/// Lazy, finite sequence of candidates
pub type CandidateStream<'a> = BoxStream<'a, Result<SourceObject, SourceError>>;

/// Errors raised by the execution platform
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("source object not found: {0}")]
    NotFound(String),

    #[error("access denied to source object: {0}")]
    Authorization(String),

    #[error("source session rejected: {0}")]
    SessionRejected(String),

    #[error("source rate limit exceeded")]
    RateLimited,

    #[error("source request timed out")]
    Timeout,

    #[error("source request failed: {0}")]
    Transport(String),

    #[error("unexpected source response: {0}")]
    Protocol(String),
}

impl SourceError {
    /// Worth retrying within the same pass
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout | Self::Transport(_))
    }

    /// No further progress is possible in this pass
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionRejected(_))
    }

    /// Classification used in the report
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Authorization(_) => ErrorKind::Authorization,
            _ => ErrorKind::Source,
        }
    }
}

/// Errors raised by the LIMS
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimsError {
    #[error("LIMS rejected record: {0}")]
    Validation(String),

    #[error("record for {external_id} already exists")]
    Conflict { external_id: String },

    #[error("{count} records share external id {external_id}")]
    MultipleHits { external_id: String, count: usize },

    #[error("LIMS session rejected: {0}")]
    SessionRejected(String),

    #[error("LIMS rate limit exceeded")]
    RateLimited,

    #[error("LIMS request timed out")]
    Timeout,

    #[error("LIMS request failed: {0}")]
    Transport(String),

    #[error("unexpected LIMS response: {0}")]
    Protocol(String),
}

impl LimsError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout | Self::Transport(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionRejected(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::MultipleHits { .. } => ErrorKind::MultipleHits,
            _ => ErrorKind::Lims,
        }
    }
}

/// Read-only view of the execution platform
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Enumerate candidates matching the filter.
    ///
    /// Restartable: every call starts a fresh enumeration.
    async fn list_candidates<'a>(
        &'a self,
        filter: &'a FilterCriteria,
    ) -> Result<CandidateStream<'a>, SourceError>;

    /// Fetch one object by id
    async fn fetch_metadata(&self, external_id: &str) -> Result<SourceObject, SourceError>;
}

/// Record store of the LIMS
#[async_trait]
pub trait LimsStore: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Point lookup by join key
    async fn find_by_external_id(
        &self,
        external_id: &str,
        record_type: RecordType,
    ) -> Result<Option<LimsRecord>, LimsError>;

    /// Persist one record. Fails with `Conflict` if the external id is taken.
    async fn create(
        &self,
        record_type: RecordType,
        external_id: &str,
        fields: &RecordFields,
    ) -> Result<LimsRecord, LimsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(SourceError::Timeout.is_transient());
        assert!(!SourceError::NotFound("x".into()).is_transient());
        assert!(SourceError::SessionRejected("x".into()).is_fatal());
        assert_eq!(SourceError::Authorization("x".into()).kind(), ErrorKind::Authorization);

        assert!(LimsError::Transport("reset".into()).is_transient());
        assert!(!LimsError::Validation("bad".into()).is_transient());
        assert_eq!(LimsError::Validation("bad".into()).kind(), ErrorKind::Validation);
    }
}
