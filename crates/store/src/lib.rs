//! kwatch store: last-seen snapshot per watched target and the change filter
//! that turns a stream of snapshots into diff records.

#![forbid(unsafe_code)]

use kwatch_core::{DiffRecord, ObjectSnapshot, ResourceTarget};
use metrics::counter;
use tracing::{debug, trace};

/// Remembers the previous snapshot of one target and decides whether a new
/// snapshot is a genuine change.
///
/// Driven by exactly one session; `observe` takes `&mut self` and there is no
/// internal locking.
pub struct SnapshotTracker {
    target: ResourceTarget,
    previous: Option<ObjectSnapshot>,
    observed: u64,
    duplicates: u64,
    changes: u64,
}

impl SnapshotTracker {
    pub fn new(target: ResourceTarget) -> Self {
        Self { target, previous: None, observed: 0, duplicates: 0, changes: 0 }
    }

    pub fn previous(&self) -> Option<&ObjectSnapshot> { self.previous.as_ref() }
    pub fn observed(&self) -> u64 { self.observed }
    pub fn duplicates(&self) -> u64 { self.duplicates }
    pub fn changes(&self) -> u64 { self.changes }

    /// Feed the next snapshot. Returns a record only when the resourceVersion
    /// differs from the previous one; the first snapshot is stored as the
    /// baseline and never diffs.
    pub fn observe(&mut self, next: ObjectSnapshot) -> Option<DiffRecord> {
        self.observed += 1;
        counter!("kwatch_events_total", 1u64);
        let Some(prev) = self.previous.as_ref() else {
            debug!(object = %self.target, rv = %next.resource_version, "baseline snapshot stored");
            self.previous = Some(next);
            return None;
        };
        if prev.resource_version == next.resource_version {
            self.duplicates += 1;
            counter!("kwatch_events_duplicate_total", 1u64);
            trace!(object = %self.target, rv = %next.resource_version, "duplicate resourceVersion ignored");
            return None;
        }
        debug!(object = %self.target, from = %prev.resource_version, to = %next.resource_version, "change observed");
        let record = DiffRecord {
            target: self.target.clone(),
            previous_text: prev.canonical_text.clone(),
            current_text: next.canonical_text.clone(),
            timestamp: chrono::Local::now(),
        };
        self.previous = Some(next);
        self.changes += 1;
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snap(rv: &str, replicas: u32) -> ObjectSnapshot {
        ObjectSnapshot::capture(json!({
            "metadata": { "name": "web", "namespace": "ns", "resourceVersion": rv },
            "spec": { "replicas": replicas }
        }))
        .unwrap()
    }

    #[test]
    fn first_snapshot_is_baseline() {
        let mut t = SnapshotTracker::new(ResourceTarget::new("deployments", "ns", "web"));
        assert!(t.previous().is_none());
        assert!(t.observe(snap("1", 1)).is_none());
        assert_eq!(t.previous().map(|p| p.resource_version.as_str()), Some("1"));
    }

    #[test]
    fn duplicate_then_change_yields_one_record() {
        let mut t = SnapshotTracker::new(ResourceTarget::new("deployments", "ns", "web"));
        assert!(t.observe(snap("1", 1)).is_none());
        assert!(t.observe(snap("1", 1)).is_none());
        let rec = t.observe(snap("2", 3)).expect("change must diff");
        assert!(rec.previous_text.contains("replicas: 1"));
        assert!(rec.current_text.contains("replicas: 3"));
        assert_eq!(rec.target.name, "web");
        assert_eq!(t.observed(), 3);
        assert_eq!(t.duplicates(), 1);
        assert_eq!(t.changes(), 1);
    }

    #[test]
    fn previous_is_replaced_on_change() {
        let mut t = SnapshotTracker::new(ResourceTarget::new("deployments", "ns", "web"));
        t.observe(snap("1", 1));
        t.observe(snap("2", 2));
        let rec = t.observe(snap("3", 5)).unwrap();
        assert!(rec.previous_text.contains("replicas: 2"));
        assert_eq!(t.previous().unwrap().resource_version, "3");
    }
}
