//! Authoritative in-memory view of the current incident's timeline.
//!
//! The store only ever installs what the persistence gateway returned
//! from a load; mutations round-trip through the gateway and come back
//! as a fresh load, so the view never shows optimistic entries the
//! gateway did not durably accept.

use crate::event::EntryId;
use crate::model::{EntryKind, TimelineEntry};
use crate::ordering::{self, OrderingError};

#[derive(Debug, Default)]
pub struct TimelineStore {
    entries: Vec<TimelineEntry>,
    /// Set when drift was detected in a load; mutations are refused
    /// until a contiguous load lands.
    stale: bool,
}

impl TimelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a freshly loaded sequence. The read comes back in
    /// ascending `entry_order`; a stable sort re-establishes that
    /// cheaply if the transport reordered rows, then the contiguity
    /// invariant is verified before anything becomes visible. On drift
    /// the previous view is kept and the store marks itself stale.
    pub fn replace(&mut self, mut entries: Vec<TimelineEntry>) -> Result<(), OrderingError> {
        entries.sort_by_key(|e| e.entry_order);
        match ordering::verify_contiguous(&entries) {
            Ok(()) => {
                self.entries = entries;
                self.stale = false;
                Ok(())
            }
            Err(drift) => {
                self.stale = true;
                Err(drift)
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.stale = false;
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True while the last load failed the contiguity check and a
    /// repair is pending. Mutating flows refuse to start in this
    /// state rather than compute orders from a sequence with gaps.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn get(&self, id: &EntryId) -> Option<&TimelineEntry> {
        self.entries.iter().find(|e| e.id == *id)
    }

    pub fn has_kind(&self, kind: EntryKind) -> bool {
        self.entries.iter().any(|e| e.kind == kind)
    }

    pub fn has_theft(&self) -> bool {
        self.has_kind(EntryKind::Theft)
    }

    pub fn has_final(&self) -> bool {
        self.has_kind(EntryKind::Final)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Coordinate, IncidentId, UnixTimeMs};

    fn entry(id: &str, kind: EntryKind, order: u32) -> TimelineEntry {
        TimelineEntry {
            id: EntryId::new(id),
            incident_id: IncidentId::new("inc-1"),
            coordinate: Coordinate::new(51.5072, -0.1276).unwrap(),
            timestamp: UnixTimeMs(1_700_000_000_000),
            duration_at_location: None,
            kind,
            entry_order: order,
        }
    }

    #[test]
    fn replace_sorts_rows_that_arrived_out_of_order() {
        let mut store = TimelineStore::new();
        store
            .replace(vec![
                entry("c", EntryKind::Holding, 3),
                entry("a", EntryKind::Theft, 1),
                entry("b", EntryKind::Path, 2),
            ])
            .unwrap();
        let ids: Vec<&str> = store.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn replace_rejects_gapped_sequences_and_keeps_old_view() {
        let mut store = TimelineStore::new();
        store
            .replace(vec![entry("a", EntryKind::Theft, 1)])
            .unwrap();

        let drift = store.replace(vec![
            entry("a", EntryKind::Theft, 1),
            entry("c", EntryKind::Holding, 3),
        ]);
        assert!(drift.is_err());
        assert!(store.is_stale());
        // Previous view survives.
        assert_eq!(store.len(), 1);
        assert_eq!(store.entries()[0].id.as_str(), "a");
    }

    #[test]
    fn contiguous_load_clears_staleness() {
        let mut store = TimelineStore::new();
        let _ = store.replace(vec![entry("b", EntryKind::Path, 2)]);
        assert!(store.is_stale());

        store
            .replace(vec![entry("a", EntryKind::Theft, 1)])
            .unwrap();
        assert!(!store.is_stale());
    }

    #[test]
    fn kind_queries() {
        let mut store = TimelineStore::new();
        store
            .replace(vec![
                entry("a", EntryKind::Theft, 1),
                entry("b", EntryKind::Holding, 2),
            ])
            .unwrap();
        assert!(store.has_theft());
        assert!(!store.has_final());
        assert!(store.get(&EntryId::new("b")).is_some());
        assert!(store.get(&EntryId::new("zz")).is_none());
    }

    #[test]
    fn clear_empties_and_unsticks() {
        let mut store = TimelineStore::new();
        let _ = store.replace(vec![entry("b", EntryKind::Path, 2)]);
        store.clear();
        assert!(store.is_empty());
        assert!(!store.is_stale());
    }
}
