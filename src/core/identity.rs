//! Identity mapping between platform objects and LIMS records.
//!
//! Platform ids are globally unique, so the external id of a record is the
//! platform id verbatim. The mapper answers "is this object already in the
//! LIMS?" and owns the race policy for concurrent imports: a uniqueness
//! conflict on write means another importer got there first, which is a skip,
//! never a failure.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adapters::{LimsError, LimsStore};
use crate::domain::{LimsRecord, RecordDraft, RecordType, SourceObject};

use super::translator;

/// Result of the pre-write lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// A record already carries this external id
    AlreadyPresent(LimsRecord),

    /// No record yet
    Absent,
}

/// Result of a write attempt that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum WriteResult {
    /// Our create produced the record
    Created(LimsRecord),

    /// Another importer created it first. The winning record is included
    /// when it could be read back.
    ImportedConcurrently(Option<LimsRecord>),
}

/// Deduplicates imports against the LIMS
#[derive(Clone)]
pub struct IdentityMapper {
    lims: Arc<dyn LimsStore>,
}

impl IdentityMapper {
    pub fn new(lims: Arc<dyn LimsStore>) -> Self {
        Self { lims }
    }

    /// Stable identity key of an object
    pub fn external_id(object: &SourceObject) -> &str {
        &object.external_id
    }

    /// Look the object up by its identity key
    pub async fn lookup(&self, object: &SourceObject) -> Result<Lookup, LimsError> {
        let record_type = RecordType::for_kind(object.kind);
        self.lookup_id(Self::external_id(object), record_type).await
    }

    /// Look up an external id under a record type
    pub async fn lookup_id(
        &self,
        external_id: &str,
        record_type: RecordType,
    ) -> Result<Lookup, LimsError> {
        match self.lims.find_by_external_id(external_id, record_type).await? {
            Some(record) => {
                debug!(external_id, lims_id = %record.lims_id, "Already imported");
                Ok(Lookup::AlreadyPresent(record))
            }
            None => Ok(Lookup::Absent),
        }
    }

    /// Write a draft, resolving uniqueness conflicts as concurrent imports
    pub async fn write(&self, draft: &RecordDraft) -> Result<WriteResult, LimsError> {
        match self
            .lims
            .create(draft.record_type, &draft.external_id, &draft.fields)
            .await
        {
            Ok(record) => {
                info!(
                    external_id = %draft.external_id,
                    lims_id = %record.lims_id,
                    record_type = %draft.record_type,
                    "Record created"
                );
                Ok(WriteResult::Created(record))
            }
            Err(LimsError::Conflict { .. }) => {
                info!(
                    external_id = %draft.external_id,
                    "Record created concurrently by another importer"
                );
                // Read back the winner so children can link to it
                let winner = match self
                    .lims
                    .find_by_external_id(&draft.external_id, draft.record_type)
                    .await
                {
                    Ok(record) => record,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(external_id = %draft.external_id, error = %e, "Could not read back concurrent record");
                        None
                    }
                };
                Ok(WriteResult::ImportedConcurrently(winner))
            }
            Err(e) => Err(e),
        }
    }

    /// Whether an existing record was created from different metadata.
    ///
    /// Only records carrying a fingerprint can be compared; objects that no
    /// longer translate are not reported as drifted.
    pub fn has_drifted(existing: &LimsRecord, object: &SourceObject) -> bool {
        let Some(stored) = existing.fingerprint() else {
            return false;
        };
        match translator::translate(object) {
            Ok(draft) => draft.fingerprint().is_some_and(|current| current != stored),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryLims;
    use crate::domain::{RecordFields, SourceKind, FINGERPRINT_FIELD};

    fn run(lane: &str) -> SourceObject {
        SourceObject::new("run-1", SourceKind::Run, "run-1")
            .with_meta("seq_run_name", "RUN_1")
            .with_meta("seq_lane_index", lane)
    }

    #[tokio::test]
    async fn test_lookup_absent_then_present() {
        let lims = Arc::new(InMemoryLims::new());
        let mapper = IdentityMapper::new(lims.clone());
        let object = run("1");

        assert_eq!(mapper.lookup(&object).await.unwrap(), Lookup::Absent);

        let draft = translator::translate(&object).unwrap();
        let written = mapper.write(&draft).await.unwrap();
        assert!(matches!(written, WriteResult::Created(_)));

        assert!(matches!(
            mapper.lookup(&object).await.unwrap(),
            Lookup::AlreadyPresent(_)
        ));
    }

    #[tokio::test]
    async fn test_conflict_is_concurrent_import() {
        let lims = Arc::new(InMemoryLims::new().with_race("run-1"));
        let mapper = IdentityMapper::new(lims.clone());
        let draft = translator::translate(&run("1")).unwrap();

        let written = mapper.write(&draft).await.unwrap();

        match written {
            WriteResult::ImportedConcurrently(Some(record)) => assert_eq!(record.external_id, "run-1"),
            other => panic!("unexpected write result: {:?}", other),
        }
        assert_eq!(lims.count_for("run-1"), 1);
    }

    #[tokio::test]
    async fn test_validation_error_propagates() {
        let lims = Arc::new(InMemoryLims::new().with_rejection("run-1"));
        let mapper = IdentityMapper::new(lims);
        let draft = translator::translate(&run("1")).unwrap();

        assert!(matches!(
            mapper.write(&draft).await,
            Err(LimsError::Validation(_))
        ));
    }

    #[test]
    fn test_drift_detection() {
        let draft = translator::translate(&run("1")).unwrap();
        let existing = LimsRecord {
            lims_id: "R1".to_string(),
            external_id: "run-1".to_string(),
            record_type: RecordType::SequencingRun,
            fields: draft.fields.clone(),
        };

        assert!(!IdentityMapper::has_drifted(&existing, &run("1")));
        assert!(IdentityMapper::has_drifted(&existing, &run("2")));

        let mut legacy = existing.clone();
        legacy.fields = RecordFields::new();
        assert!(legacy.fields.get(FINGERPRINT_FIELD).is_none());
        assert!(!IdentityMapper::has_drifted(&legacy, &run("2")));
    }
}
