//! In-memory adapters.
//!
//! `InMemoryLims` enforces the same uniqueness constraint as the real LIMS
//! (one record per external id and record type), so the pipeline behaves the
//! same against it. Both adapters support failure injection for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use crate::domain::{FilterCriteria, LimsRecord, RecordFields, RecordType, SourceObject};

use super::{CandidateStream, LimsError, LimsStore, MetadataSource, SourceError};

/// Execution platform backed by a fixed list of objects
#[derive(Debug, Default)]
pub struct InMemorySource {
    objects: Vec<SourceObject>,
    /// Objects that exist but are not returned by `list_candidates`
    hidden: Vec<SourceObject>,
    /// Listing yields this error in place of the object with the given id
    item_errors: HashMap<String, SourceError>,
    /// Listing fails outright with this error
    listing_error: Option<SourceError>,
}

impl InMemorySource {
    pub fn new(objects: Vec<SourceObject>) -> Self {
        Self {
            objects,
            ..Default::default()
        }
    }

    /// Register an object reachable only through `fetch_metadata`
    pub fn with_unlisted(mut self, object: SourceObject) -> Self {
        self.hidden.push(object);
        self
    }

    /// Replace the listed object with `external_id` by an error
    pub fn with_item_error(mut self, external_id: impl Into<String>, error: SourceError) -> Self {
        self.item_errors.insert(external_id.into(), error);
        self
    }

    /// Make every listing fail
    pub fn with_listing_error(mut self, error: SourceError) -> Self {
        self.listing_error = Some(error);
        self
    }
}

#[async_trait]
impl MetadataSource for InMemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_candidates<'a>(
        &'a self,
        filter: &'a FilterCriteria,
    ) -> Result<CandidateStream<'a>, SourceError> {
        if let Some(err) = &self.listing_error {
            return Err(err.clone());
        }

        let items = self
            .objects
            .iter()
            .filter(move |o| filter.accepts(o))
            .map(move |o| match self.item_errors.get(&o.external_id) {
                Some(err) => Err(err.clone()),
                None => Ok(o.clone()),
            });

        Ok(stream::iter(items).boxed())
    }

    async fn fetch_metadata(&self, external_id: &str) -> Result<SourceObject, SourceError> {
        if let Some(err) = self.item_errors.get(external_id) {
            return Err(err.clone());
        }
        self.objects
            .iter()
            .chain(self.hidden.iter())
            .find(|o| o.external_id == external_id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(external_id.to_string()))
    }
}

/// LIMS backed by a map keyed on (record type, external id)
#[derive(Debug, Default)]
pub struct InMemoryLims {
    records: Mutex<HashMap<(RecordType, String), LimsRecord>>,
    next_id: Mutex<HashMap<RecordType, u64>>,
    /// `create` fails validation for these external ids
    reject: HashSet<String>,
    /// Another importer wins the race for these external ids
    race: HashSet<String>,
    /// Every call fails with `SessionRejected` once this many creates succeeded
    reject_session_after: Option<usize>,
    creates: AtomicUsize,
    lookups: AtomicUsize,
}

impl InMemoryLims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record as if it had been imported earlier
    pub fn with_record(self, record: LimsRecord) -> Self {
        self.insert(record);
        self
    }

    /// Fail validation on create for this external id
    pub fn with_rejection(mut self, external_id: impl Into<String>) -> Self {
        self.reject.insert(external_id.into());
        self
    }

    /// Simulate a concurrent importer creating this external id between
    /// our lookup and our write
    pub fn with_race(mut self, external_id: impl Into<String>) -> Self {
        self.race.insert(external_id.into());
        self
    }

    /// Reject the session once `creates` records have been written
    pub fn with_session_rejected_after(mut self, creates: usize) -> Self {
        self.reject_session_after = Some(creates);
        self
    }

    /// All stored records
    pub fn records(&self) -> Vec<LimsRecord> {
        self.lock_records().values().cloned().collect()
    }

    /// Number of records carrying this external id, across all types
    pub fn count_for(&self, external_id: &str) -> usize {
        self.lock_records()
            .values()
            .filter(|r| r.external_id == external_id)
            .count()
    }

    /// Stored record for an external id
    pub fn record_for(&self, external_id: &str) -> Option<LimsRecord> {
        self.lock_records()
            .values()
            .find(|r| r.external_id == external_id)
            .cloned()
    }

    /// Number of successful writes
    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Number of lookups
    pub fn lookup_calls(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn insert(&self, record: LimsRecord) {
        self.lock_records()
            .insert((record.record_type, record.external_id.clone()), record);
    }

    fn allocate_id(&self, record_type: RecordType) -> String {
        let mut next = self
            .next_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let counter = next.entry(record_type).or_insert(0);
        *counter += 1;
        let prefix = match record_type {
            RecordType::SequencingRun => "R",
            RecordType::AnalysisResult => "A",
            RecordType::SequencingResult => "F",
        };
        format!("{}{}", prefix, counter)
    }

    fn check_session(&self) -> Result<(), LimsError> {
        match self.reject_session_after {
            Some(limit) if self.creates.load(Ordering::SeqCst) >= limit => Err(
                LimsError::SessionRejected("API key revoked".to_string()),
            ),
            _ => Ok(()),
        }
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, HashMap<(RecordType, String), LimsRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl LimsStore for InMemoryLims {
    fn name(&self) -> &str {
        "memory"
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
        record_type: RecordType,
    ) -> Result<Option<LimsRecord>, LimsError> {
        self.check_session()?;
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .lock_records()
            .get(&(record_type, external_id.to_string()))
            .cloned())
    }

    async fn create(
        &self,
        record_type: RecordType,
        external_id: &str,
        fields: &RecordFields,
    ) -> Result<LimsRecord, LimsError> {
        self.check_session()?;

        if self.reject.contains(external_id) {
            return Err(LimsError::Validation(format!(
                "{} record for {} failed validation",
                record_type, external_id
            )));
        }

        let key = (record_type, external_id.to_string());

        if self.race.contains(external_id) {
            let lims_id = self.allocate_id(record_type);
            let mut records = self.lock_records();
            records.entry(key.clone()).or_insert_with(|| LimsRecord {
                lims_id,
                external_id: external_id.to_string(),
                record_type,
                fields: fields.clone(),
            });
        }

        let mut records = self.lock_records();
        if records.contains_key(&key) {
            return Err(LimsError::Conflict {
                external_id: external_id.to_string(),
            });
        }

        let record = LimsRecord {
            lims_id: self.allocate_id(record_type),
            external_id: external_id.to_string(),
            record_type,
            fields: fields.clone(),
        };
        records.insert(key, record.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);

        Ok(record)
    }
}
