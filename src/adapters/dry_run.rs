//! Read-through LIMS wrapper that never writes.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::domain::{LimsRecord, RecordFields, RecordType};

use super::{LimsError, LimsStore};

/// Performs real lookups and answers creates with placeholder records
pub struct DryRunLims<L> {
    inner: L,
    planned: AtomicU64,
}

impl<L> DryRunLims<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            planned: AtomicU64::new(0),
        }
    }

    /// Number of creates that would have been issued
    pub fn planned_creates(&self) -> u64 {
        self.planned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<L: LimsStore> LimsStore for DryRunLims<L> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
        record_type: RecordType,
    ) -> Result<Option<LimsRecord>, LimsError> {
        self.inner.find_by_external_id(external_id, record_type).await
    }

    async fn create(
        &self,
        record_type: RecordType,
        external_id: &str,
        fields: &RecordFields,
    ) -> Result<LimsRecord, LimsError> {
        let n = self.planned.fetch_add(1, Ordering::SeqCst) + 1;
        info!(%record_type, external_id, "Dry run: would create record");

        Ok(LimsRecord {
            lims_id: format!("dry-run-{}", n),
            external_id: external_id.to_string(),
            record_type,
            fields: fields.clone(),
        })
    }
}
