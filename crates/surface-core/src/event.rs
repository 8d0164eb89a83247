//! Normalized event batches for one scan.
//!
//! Incoming records are validated into [`PortEvent`]s and collapsed to one
//! authoritative event per triple before change detection and scoring.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::error::MalformedEventError;
use crate::types::{PortEvent, PortKey, RawPortEvent};

/// All validated events of one scan plus the derived per-triple view.
#[derive(Debug, Clone, Default)]
pub struct EventBatch {
    events: Vec<PortEvent>,
    latest: BTreeMap<PortKey, PortEvent>,
    hosts: BTreeSet<String>,
}

impl EventBatch {
    /// Build a batch from validated events.
    ///
    /// When a triple occurs more than once the event with the latest
    /// timestamp wins; on equal timestamps the later one in batch order wins.
    /// `hosts_up` adds hosts that answered the scan without reporting any port.
    pub fn new(events: Vec<PortEvent>, hosts_up: impl IntoIterator<Item = String>) -> Self {
        let mut latest: BTreeMap<PortKey, PortEvent> = BTreeMap::new();
        let mut hosts: BTreeSet<String> = hosts_up
            .into_iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();

        for event in &events {
            hosts.insert(event.host.clone());
            let key = event.key();
            match latest.get(&key) {
                Some(existing) if existing.timestamp > event.timestamp => {}
                _ => {
                    latest.insert(key, event.clone());
                }
            }
        }

        Self {
            events,
            latest,
            hosts,
        }
    }

    /// Every validated event, duplicates included, in arrival order.
    pub fn events(&self) -> &[PortEvent] {
        &self.events
    }

    /// One event per triple, ordered by triple.
    pub fn authoritative(&self) -> impl Iterator<Item = &PortEvent> {
        self.latest.values()
    }

    pub fn get(&self, key: &PortKey) -> Option<&PortEvent> {
        self.latest.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &PortKey> {
        self.latest.keys()
    }

    /// Hosts seen in this scan, with or without port rows.
    pub fn hosts(&self) -> &BTreeSet<String> {
        &self.hosts
    }

    pub fn triple_count(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Validate raw records, splitting them into good events and rejects.
pub fn normalize(
    raw: &[RawPortEvent],
    timestamp: DateTime<Utc>,
) -> (Vec<PortEvent>, Vec<MalformedEventError>) {
    let mut events = Vec::with_capacity(raw.len());
    let mut dropped = Vec::new();

    for (index, record) in raw.iter().enumerate() {
        match record.validate(index, timestamp) {
            Ok(event) => events.push(event),
            Err(err) => {
                tracing::warn!(error = %err, "Dropping malformed port event");
                dropped.push(err);
            }
        }
    }

    (events, dropped)
}
