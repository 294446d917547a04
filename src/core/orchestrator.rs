//! Import orchestrator.
//!
//! Drives one synchronization pass: enumerate candidates, skip what the LIMS
//! already has, translate, write, and record one outcome per object.
//!
//! Per-object state machine:
//!
//! ```text
//! Discovered --lookup--> AlreadyPresent -> Skipped
//!                    \-> Absent -> Translating --error--> Failed
//!                                      |
//!                                      v
//!                               (parent resolution) --missing--> Failed
//!                                      |
//!                                      v
//!                                   Writing --ok--> Created
//!                                           --conflict--> Skipped
//!                                           --other--> Failed
//! ```
//!
//! Candidates are processed in tiers by kind (runs, then analyses, then
//! files) so that parents are always settled before their children. Within a
//! tier, objects run concurrently up to `SyncOptions::concurrency`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{LimsError, LimsStore, MetadataSource, SourceError};
use crate::domain::{
    ErrorKind, FilterCriteria, ImportOutcome, ItemOutcome, LimsId, LimsRecord, PassAbort,
    RecordDraft, RecordType, ReportAccumulator, SkipReason, SourceKind, SourceObject, SyncReport,
};

use super::identity::{IdentityMapper, Lookup, WriteResult};
use super::limits::{LimitViolation, PassLimits, PassTracker};
use super::translator::{self, TranslationError};

/// Tunables of a pass
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Objects processed concurrently within a tier
    pub concurrency: usize,

    /// Pass-level limits
    pub limits: PassLimits,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            limits: PassLimits::default(),
        }
    }
}

/// Errors of single-object operations outside a pass
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Lims(#[from] LimsError),
}

/// Everything known about one object, without writing anything
#[derive(Debug, Clone)]
pub struct Inspection {
    /// The object as the platform describes it now
    pub object: SourceObject,

    /// Existing LIMS record, if already imported
    pub existing: Option<LimsRecord>,

    /// What would be written
    pub draft: Result<RecordDraft, TranslationError>,

    /// Existing record was created from different metadata
    pub metadata_drift: bool,
}

/// Main import orchestrator
pub struct Orchestrator {
    source: Arc<dyn MetadataSource>,
    mapper: IdentityMapper,
    options: SyncOptions,
}

impl Orchestrator {
    /// Create an orchestrator over the two adapters
    pub fn new(source: Arc<dyn MetadataSource>, lims: Arc<dyn LimsStore>) -> Self {
        Self {
            source,
            mapper: IdentityMapper::new(lims),
            options: SyncOptions::default(),
        }
    }

    /// Override pass options
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Run one synchronization pass.
    ///
    /// Never fails: every problem ends up in the report, either as a Failed
    /// outcome or as the pass abort reason.
    #[instrument(skip(self, filter), fields(source = %self.source.name()))]
    pub async fn run_pass(&self, filter: &FilterCriteria) -> SyncReport {
        let pass = Pass::new(self);
        info!(pass_id = %pass.id, "Starting sync pass");

        let candidates = pass.collect_candidates(filter).await;
        info!(count = candidates.len(), "Candidates discovered");

        let mut tiers: BTreeMap<u8, Vec<SourceObject>> = BTreeMap::new();
        for object in candidates {
            tiers.entry(object.kind.rank()).or_default().push(object);
        }

        let concurrency = self.options.concurrency.max(1);
        for (rank, tier) in tiers {
            if pass.report.is_aborted() {
                break;
            }
            debug!(rank, objects = tier.len(), "Processing tier");
            stream::iter(tier)
                .for_each_concurrent(concurrency, |object| pass.import_candidate(object))
                .await;
        }

        let report = pass.report.finish();
        let counts = report.counts();
        match &report.aborted {
            Some(abort) => error!(
                created = counts.created,
                skipped = counts.skipped,
                failed = counts.failed,
                %abort,
                "Sync pass aborted"
            ),
            None => info!(
                created = counts.created,
                skipped = counts.skipped,
                failed = counts.failed,
                "Sync pass finished"
            ),
        }
        report
    }

    /// Fetch one object and compare it against the LIMS without writing
    pub async fn inspect(&self, external_id: &str) -> Result<Inspection, SyncError> {
        let object = self.source.fetch_metadata(external_id).await?;
        let existing = match self.mapper.lookup(&object).await? {
            Lookup::AlreadyPresent(record) => Some(record),
            Lookup::Absent => None,
        };
        let metadata_drift = existing
            .as_ref()
            .is_some_and(|record| IdentityMapper::has_drifted(record, &object));
        let draft = translator::translate(&object);

        Ok(Inspection {
            object,
            existing,
            draft,
            metadata_drift,
        })
    }
}

/// Where a child should point to
#[derive(Debug, Clone)]
struct ParentLink {
    kind: SourceKind,
    record_type: RecordType,
    lims_id: LimsId,
}

/// Settled state of an object within a pass, shared with its children
type Settled = Result<ParentLink, String>;

/// Per-object result before it is recorded
enum Processed {
    Done { outcome: ImportOutcome, drift: bool },
    Fatal { error_kind: ErrorKind, message: String },
}

impl Processed {
    fn done(outcome: ImportOutcome) -> Self {
        Self::Done {
            outcome,
            drift: false,
        }
    }

    fn failed(error_kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::done(ImportOutcome::failed(error_kind, message))
    }

    fn from_lims(e: LimsError) -> Self {
        if e.is_fatal() {
            Self::Fatal {
                error_kind: e.kind(),
                message: e.to_string(),
            }
        } else {
            Self::failed(e.kind(), e.to_string())
        }
    }
}

/// State of one pass
struct Pass<'o> {
    id: Uuid,
    orchestrator: &'o Orchestrator,
    report: ReportAccumulator,
    tracker: PassTracker,
    /// Kinds of every listed candidate
    listed: Mutex<HashMap<String, SourceKind>>,
    settled: Mutex<HashMap<String, Arc<OnceCell<Settled>>>>,
}

impl<'o> Pass<'o> {
    fn new(orchestrator: &'o Orchestrator) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            orchestrator,
            report: ReportAccumulator::new(id),
            tracker: PassTracker::new(),
            listed: Mutex::new(HashMap::new()),
            settled: Mutex::new(HashMap::new()),
        }
    }

    /// Drain the listing. Duplicate ids are listed once.
    ///
    /// The pass timeout bounds the whole drain, page fetches included.
    async fn collect_candidates(&self, filter: &FilterCriteria) -> Vec<SourceObject> {
        let limits = &self.orchestrator.options.limits;

        let opened = timeout(
            limits.remaining(&self.tracker),
            self.orchestrator.source.list_candidates(filter),
        )
        .await;
        let mut listing = match opened {
            Ok(Ok(listing)) => listing,
            Ok(Err(e)) => {
                error!(error = %e, "Could not list candidates");
                self.report.abort(listing_abort(&e));
                return Vec::new();
            }
            Err(_) => {
                self.listing_timed_out();
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        loop {
            let item = match timeout(limits.remaining(&self.tracker), listing.next()).await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(_) => {
                    self.listing_timed_out();
                    break;
                }
            };
            match item {
                Ok(object) => {
                    if seen.insert(object.external_id.clone()) {
                        candidates.push(object);
                    } else {
                        debug!(external_id = %object.external_id, "Duplicate listing entry ignored");
                    }
                }
                Err(SourceError::NotFound(id)) => {
                    self.record_unreadable(id, ErrorKind::NotFound, "object vanished during listing");
                }
                Err(SourceError::Authorization(id)) => {
                    self.record_unreadable(id, ErrorKind::Authorization, "access denied");
                }
                Err(e) => {
                    error!(error = %e, "Listing interrupted");
                    self.report.abort(listing_abort(&e));
                    break;
                }
            }
        }

        self.listed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(candidates.iter().map(|o| (o.external_id.clone(), o.kind)));

        candidates
    }

    fn listing_timed_out(&self) {
        let limits = &self.orchestrator.options.limits;
        self.limit_reached(LimitViolation::PassTimeout {
            elapsed_seconds: self.tracker.elapsed().as_secs(),
            limit_seconds: limits.pass_timeout_seconds,
        });
    }

    fn listed_kind(&self, external_id: &str) -> Option<SourceKind> {
        self.listed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(external_id)
            .copied()
    }

    fn record_unreadable(&self, external_id: String, error_kind: ErrorKind, message: &str) {
        warn!(%external_id, %error_kind, "Source object could not be read");
        self.report.push(ItemOutcome::new(
            external_id,
            None,
            ImportOutcome::failed(error_kind, message),
        ));
    }

    /// Import one listed object, unless the pass has stopped
    async fn import_candidate(&self, object: SourceObject) {
        if self.report.is_aborted() {
            return;
        }
        if !self.within_limits() {
            return;
        }

        let cell = self.cell(&object.external_id);
        cell.get_or_init(|| self.import_object(object, None)).await;
    }

    /// Check pass limits, aborting the pass once one is reached
    fn within_limits(&self) -> bool {
        match self.orchestrator.options.limits.check(&self.tracker) {
            Ok(()) => true,
            Err(violation) => {
                self.limit_reached(violation);
                false
            }
        }
    }

    fn limit_reached(&self, violation: LimitViolation) {
        warn!(%violation, "Pass limit reached, abandoning remaining objects");
        self.report.abort(PassAbort::LimitReached {
            message: violation.to_string(),
        });
    }

    /// Shared settlement slot of an external id
    fn cell(&self, external_id: &str) -> Arc<OnceCell<Settled>> {
        let mut settled = self
            .settled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        settled
            .entry(external_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Run the state machine for one object and record its outcome.
    ///
    /// Boxed because parent resolution may recurse into another import.
    fn import_object(
        &self,
        object: SourceObject,
        triggered_by: Option<String>,
    ) -> BoxFuture<'_, Settled> {
        async move {
            self.tracker.record_object();
            debug!(external_id = %object.external_id, kind = %object.kind, "Importing");

            let (outcome, drift) = match self.process(&object).await {
                Processed::Done { outcome, drift } => (outcome, drift),
                Processed::Fatal {
                    error_kind,
                    message,
                } => {
                    error!(external_id = %object.external_id, %message, "Unrecoverable adapter failure");
                    self.report.abort(PassAbort::SessionRejected {
                        message: message.clone(),
                    });
                    (ImportOutcome::failed(error_kind, message), false)
                }
            };

            if let ImportOutcome::Failed { error_kind, message } = &outcome {
                warn!(external_id = %object.external_id, %error_kind, %message, "Import failed");
            }
            if drift {
                warn!(
                    external_id = %object.external_id,
                    "Platform metadata changed since import; record left unchanged"
                );
            }

            let settled = settle(&object, &outcome);

            let mut item = ItemOutcome::new(object.external_id, Some(object.kind), outcome);
            item.triggered_by = triggered_by;
            item.metadata_drift = drift;
            self.report.push(item);

            settled
        }
        .boxed()
    }

    async fn process(&self, object: &SourceObject) -> Processed {
        let mapper = &self.orchestrator.mapper;

        match mapper.lookup(object).await {
            Ok(Lookup::AlreadyPresent(record)) => {
                let drift = IdentityMapper::has_drifted(&record, object);
                return Processed::Done {
                    outcome: ImportOutcome::Skipped {
                        reason: SkipReason::AlreadyImported,
                        lims_id: Some(record.lims_id),
                    },
                    drift,
                };
            }
            Ok(Lookup::Absent) => {}
            Err(e) => return Processed::from_lims(e),
        }

        if object.kind.requires_parent() && object.parent_id.is_none() {
            return Processed::failed(
                ErrorKind::MissingParent,
                format!("{} has no parent object", object.kind),
            );
        }

        let mut draft = match translator::translate(object) {
            Ok(draft) => draft,
            Err(e) => return Processed::failed(e.kind(), e.to_string()),
        };

        // Runs are roots; any parent reference on them is ignored
        if object.kind != SourceKind::Run {
            if let Some(parent_id) = &object.parent_id {
                match self.resolve_parent(object, parent_id).await {
                    Ok(link) => draft.link_parent(link.record_type, &link.lims_id),
                    Err(message) => return Processed::failed(ErrorKind::MissingParent, message),
                }
            }
        }

        if self.report.is_aborted() {
            return Processed::failed(ErrorKind::Lims, "pass aborted before write");
        }

        match mapper.write(&draft).await {
            Ok(WriteResult::Created(record)) => Processed::done(ImportOutcome::Created {
                lims_id: record.lims_id,
            }),
            Ok(WriteResult::ImportedConcurrently(winner)) => Processed::done(ImportOutcome::Skipped {
                reason: SkipReason::ImportedConcurrently,
                lims_id: winner.map(|r| r.lims_id),
            }),
            Err(e) => Processed::from_lims(e),
        }
    }

    /// Settle the parent first, importing it if this pass has not seen it
    async fn resolve_parent(&self, child: &SourceObject, parent_id: &str) -> Result<ParentLink, String> {
        // A listed parent of the wrong kind must not be settled on its own behalf
        if let Some(kind) = self.listed_kind(parent_id) {
            if !can_contain(kind, child.kind) {
                return Err(format!(
                    "parent {} is a {}, which cannot contain a {}",
                    parent_id, kind, child.kind
                ));
            }
        }

        let cell = self.cell(parent_id);
        let settled = cell
            .get_or_init(|| self.import_parent(parent_id.to_string(), child))
            .await;

        match settled {
            Ok(link) if can_contain(link.kind, child.kind) => Ok(link.clone()),
            Ok(link) => Err(format!(
                "parent {} is a {}, which cannot contain a {}",
                parent_id, link.kind, child.kind
            )),
            Err(reason) => Err(format!("parent {} not imported: {}", parent_id, reason)),
        }
    }

    /// Fetch a parent that was not among the candidates and import it
    async fn import_parent(&self, parent_id: String, child: &SourceObject) -> Settled {
        let child_id = child.external_id.clone();
        if !self.within_limits() {
            return Err("pass limit reached before the parent was imported".to_string());
        }
        info!(%parent_id, %child_id, "Importing parent ahead of child");

        let parent = match self.orchestrator.source.fetch_metadata(&parent_id).await {
            Ok(parent) => parent,
            Err(e) => {
                if e.is_fatal() {
                    self.report.abort(PassAbort::SessionRejected {
                        message: e.to_string(),
                    });
                }
                warn!(%parent_id, error = %e, "Parent could not be fetched");
                return Err(e.to_string());
            }
        };

        if !can_contain(parent.kind, child.kind) {
            return Err(format!("a {} cannot contain a {}", parent.kind, child.kind));
        }

        self.import_object(parent, Some(child_id)).await
    }
}

fn can_contain(parent: SourceKind, child: SourceKind) -> bool {
    parent.is_container() && parent.rank() < child.rank()
}

/// What children of this object will see
fn settle(object: &SourceObject, outcome: &ImportOutcome) -> Settled {
    match outcome {
        ImportOutcome::Failed { error_kind, message } => {
            Err(format!("{} ({})", message, error_kind))
        }
        other => match other.lims_id() {
            Some(lims_id) => Ok(ParentLink {
                kind: object.kind,
                record_type: RecordType::for_kind(object.kind),
                lims_id: lims_id.to_string(),
            }),
            None => Err("imported concurrently but the record could not be read back".to_string()),
        },
    }
}

fn listing_abort(e: &SourceError) -> PassAbort {
    if e.is_fatal() {
        PassAbort::SessionRejected {
            message: e.to_string(),
        }
    } else {
        PassAbort::ListingFailed {
            message: e.to_string(),
        }
    }
}
