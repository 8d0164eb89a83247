//! History store contract and the read-before-write snapshot.
//!
//! Change detection needs each triple's state *before* the current scan is
//! applied. The contract is split in two phases:
//!
//! 1. [`BaselineSnapshot::capture`] performs every read for the scan.
//! 2. [`BaselineSnapshot::commit`] writes the scan's events and upserts
//!    history. The store's write entry point requires a [`CommitTicket`],
//!    which only a snapshot can mint, so history cannot be mutated for a
//!    scan whose baseline was not read first.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::error::StorageResult;
use crate::event::EventBatch;
use crate::types::{PortHistoryRecord, PortKey, PortState, ScanId, ScanOutcome, ScanRecord};

/// The previous side of a comparison: what the most recent prior scan of a
/// target observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Baseline {
    /// The prior scan this baseline was taken from.
    pub scan_id: Option<ScanId>,
    /// Hosts that prior scan saw.
    pub hosts: BTreeSet<String>,
    /// History records for the triples that prior scan observed.
    pub records: Vec<PortHistoryRecord>,
}

/// Proof that a baseline was captured for a scan. Required to write history.
#[derive(Debug)]
pub struct CommitTicket {
    scan_id: ScanId,
}

impl CommitTicket {
    pub fn scan_id(&self) -> ScanId {
        self.scan_id
    }
}

/// Persistence contract consumed by the pipeline.
///
/// Implementations must make [`HistoryStore::commit_scan`] all-or-nothing
/// and must upsert each triple atomically, so that concurrent scans sharing a
/// host never lose a `seen_count` increment.
pub trait HistoryStore: Send + Sync {
    /// Create a scan row in `running` state and return its id.
    fn record_scan(
        &self,
        target: &str,
        profile: &str,
        timestamp: DateTime<Utc>,
    ) -> StorageResult<ScanId>;

    /// Finalize a scan row with its status, error and duration.
    fn finish_scan(&self, scan_id: ScanId, outcome: &ScanOutcome) -> StorageResult<()>;

    /// Attach a free-form key/value pair to a scan.
    fn record_scan_metadata(&self, scan_id: ScanId, key: &str, value: &str) -> StorageResult<()>;

    /// Current state of a triple before this scan's upsert, if ever seen.
    fn prior_state(&self, key: &PortKey) -> StorageResult<Option<PortState>>;

    /// History of the triples observed by the most recent non-failed scan of
    /// `target` older than `before`.
    fn latest_baseline(&self, target: &str, before: ScanId) -> StorageResult<Baseline>;

    /// Persist all events of the scan, then upsert history once per
    /// authoritative triple, in a single transaction.
    fn commit_scan(&self, ticket: CommitTicket, batch: &EventBatch) -> StorageResult<()>;

    fn scan(&self, scan_id: ScanId) -> StorageResult<Option<ScanRecord>>;

    /// Most recent scans first, optionally for one target.
    fn list_scans(&self, target: Option<&str>, limit: usize) -> StorageResult<Vec<ScanRecord>>;

    /// Most recent completed or partial scan of a target.
    fn last_scan(&self, target: &str) -> StorageResult<Option<ScanRecord>>;

    fn history(&self, key: &PortKey) -> StorageResult<Option<PortHistoryRecord>>;

    fn host_history(&self, host: &str) -> StorageResult<Vec<PortHistoryRecord>>;
}

/// Everything the change detector reads, captured before any write.
///
/// A view can be assembled freely, but it cannot write history. Only a
/// [`BaselineSnapshot`] can, and only once.
#[derive(Debug, Clone)]
pub struct BaselineView {
    scan_id: ScanId,
    prior_scan: Option<ScanId>,
    baseline_hosts: BTreeSet<String>,
    baseline: BTreeMap<PortKey, PortHistoryRecord>,
    prior: BTreeMap<PortKey, PortState>,
}

impl BaselineView {
    /// Assemble a view from reads already performed.
    pub fn from_parts(
        scan_id: ScanId,
        prior_scan: Option<ScanId>,
        baseline_hosts: BTreeSet<String>,
        baseline_records: Vec<PortHistoryRecord>,
        prior: BTreeMap<PortKey, PortState>,
    ) -> Self {
        let baseline = baseline_records
            .into_iter()
            .map(|r| (r.key(), r))
            .collect();
        Self {
            scan_id,
            prior_scan,
            baseline_hosts,
            baseline,
            prior,
        }
    }

    pub fn scan_id(&self) -> ScanId {
        self.scan_id
    }

    /// The scan the baseline was taken from; `None` on a target's first scan.
    pub fn prior_scan(&self) -> Option<ScanId> {
        self.prior_scan
    }

    pub fn baseline_hosts(&self) -> &BTreeSet<String> {
        &self.baseline_hosts
    }

    /// State of a triple before this scan, relative to the target's previous
    /// scan.
    ///
    /// A known triple that the previous scan did not report is `closed`, even
    /// if its stored state is still `open`: history is only updated for
    /// triples a scan observes.
    pub fn prior_state(&self, key: &PortKey) -> Option<PortState> {
        if self.prior_scan.is_some() && !self.baseline.contains_key(key) {
            return self.prior.get(key).map(|_| PortState::Closed);
        }
        self.prior
            .get(key)
            .copied()
            .or_else(|| self.baseline.get(key).map(|r| r.current_state))
    }

    /// Baseline records, ordered by triple.
    pub fn baseline_records(&self) -> impl Iterator<Item = &PortHistoryRecord> {
        self.baseline.values()
    }
}

/// The read phase of one scan. Obtainable only through
/// [`BaselineSnapshot::capture`]; consumed by [`BaselineSnapshot::commit`].
#[derive(Debug)]
pub struct BaselineSnapshot {
    view: BaselineView,
}

impl BaselineSnapshot {
    /// Read the baseline for `target` and the prior state of every triple in
    /// `batch`.
    pub fn capture<S>(
        store: &S,
        scan_id: ScanId,
        target: &str,
        batch: &EventBatch,
    ) -> StorageResult<Self>
    where
        S: HistoryStore + ?Sized,
    {
        let baseline = store.latest_baseline(target, scan_id)?;

        let mut prior = BTreeMap::new();
        for key in batch.keys() {
            if let Some(state) = store.prior_state(key)? {
                prior.insert(key.clone(), state);
            }
        }

        tracing::debug!(
            scan_id = %scan_id,
            target = %target,
            prior_scan = ?baseline.scan_id,
            baseline_records = baseline.records.len(),
            known_triples = prior.len(),
            "Baseline captured"
        );

        let view = BaselineView::from_parts(
            scan_id,
            baseline.scan_id,
            baseline.hosts,
            baseline.records,
            prior,
        );
        Ok(Self { view })
    }

    pub fn view(&self) -> &BaselineView {
        &self.view
    }

    pub fn scan_id(&self) -> ScanId {
        self.view.scan_id
    }

    /// Write the scan's events and history. Consumes the snapshot.
    pub fn commit<S>(self, store: &S, batch: &EventBatch) -> StorageResult<()>
    where
        S: HistoryStore + ?Sized,
    {
        let ticket = CommitTicket {
            scan_id: self.view.scan_id,
        };
        store.commit_scan(ticket, batch)
    }
}
