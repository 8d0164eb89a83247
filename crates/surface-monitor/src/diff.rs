//! Change detection: classify each triple of the current scan against the
//! state captured before the scan was committed.

use std::collections::BTreeSet;

use surface_core::{BaselineView, ChangeSet, EventBatch, PortChange, PortKey, PortState};

/// Transition category of one triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    NewlyOpened,
    NewlyClosed,
    StillOpen,
    Reopened,
    /// Observed but not a change worth listing (e.g. filtered to filtered).
    Unchanged,
}

/// Classify a triple from its prior and current state.
///
/// `current` is `None` when the triple was in the baseline but is absent
/// from the current scan.
pub fn classify(prior: Option<PortState>, current: Option<PortState>) -> Transition {
    use PortState::*;

    match (prior, current) {
        (None | Some(Unknown), Some(Open)) => Transition::NewlyOpened,
        (Some(Open), Some(Open)) => Transition::StillOpen,
        (Some(Closed | Filtered), Some(Open)) => Transition::Reopened,
        (Some(Open), Some(Closed | Filtered) | None) => Transition::NewlyClosed,
        _ => Transition::Unchanged,
    }
}

/// Compare the current batch with the baseline and build the change set.
///
/// Reads only the view, so running it twice against the same inputs
/// yields the same result. Every list is sorted by triple.
pub fn detect_changes(batch: &EventBatch, snapshot: &BaselineView) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for event in batch.authoritative() {
        let key = event.key();
        let prior = snapshot.prior_state(&key);
        let change = PortChange {
            key,
            previous: prior,
            current: Some(event.state),
            service: event.service.clone(),
        };
        push(&mut changes, classify(prior, Some(event.state)), change);
    }

    // Baseline triples the current scan did not report: their host answered
    // without that port, or the host vanished from the scan entirely.
    let current: BTreeSet<&PortKey> = batch.keys().collect();
    for record in snapshot.baseline_records() {
        let key = record.key();
        if current.contains(&key) {
            continue;
        }
        let prior = snapshot.prior_state(&key);
        if classify(prior, None) == Transition::NewlyClosed {
            changes.newly_closed.push(PortChange {
                key,
                previous: prior,
                current: None,
                service: None,
            });
        }
    }

    changes.newly_closed.sort_by(|a, b| a.key.cmp(&b.key));

    let vanished = snapshot
        .baseline_hosts()
        .iter()
        .filter(|h| !batch.hosts().contains(*h))
        .count();

    tracing::info!(
        scan_id = %snapshot.scan_id(),
        prior_scan = ?snapshot.prior_scan(),
        newly_opened = changes.newly_opened.len(),
        newly_closed = changes.newly_closed.len(),
        still_open = changes.still_open.len(),
        reopened = changes.reopened.len(),
        vanished_hosts = vanished,
        "Change detection complete"
    );

    changes
}

fn push(changes: &mut ChangeSet, transition: Transition, change: PortChange) {
    match transition {
        Transition::NewlyOpened => changes.newly_opened.push(change),
        Transition::NewlyClosed => changes.newly_closed.push(change),
        Transition::StillOpen => changes.still_open.push(change),
        Transition::Reopened => changes.reopened.push(change),
        Transition::Unchanged => changes.uncategorized += 1,
    }
}
