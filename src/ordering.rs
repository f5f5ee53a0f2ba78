//! Entry order maintenance.
//!
//! An incident's timeline entries carry a contiguous ascending
//! `entry_order` starting at 1. Reindexing is a pure function of the
//! current survivors in their existing relative order, which makes it
//! idempotent and tolerant of entries arriving from storage in any
//! order, as long as a stable sort on the stored order reproduces the
//! relative sequence.

use thiserror::Error;

use crate::event::EntryId;
use crate::model::TimelineEntry;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderingError {
    #[error("the theft entry anchors the timeline; deleting it deletes the whole incident")]
    TheftEntryProtected,

    #[error("entry {0} is not in the timeline")]
    EntryNotFound(EntryId),

    #[error("entry orders are not contiguous: expected {expected} at position {position}, found {found}")]
    Drift {
        expected: u32,
        found: u32,
        position: usize,
    },
}

/// Assigns `entry_order = 1..N` by the entries' existing relative
/// order. Already-contiguous input comes back unchanged.
pub fn reindex(mut entries: Vec<TimelineEntry>) -> Vec<TimelineEntry> {
    entries.sort_by_key(|e| e.entry_order);
    for (position, entry) in entries.iter_mut().enumerate() {
        entry.entry_order = position as u32 + 1;
    }
    entries
}

/// Removes `target` and reindexes the survivors. THEFT entries are
/// rejected here; removing one is an incident-level cascade, never a
/// row delete.
pub fn delete_and_reindex(
    entries: Vec<TimelineEntry>,
    target: &EntryId,
) -> Result<Vec<TimelineEntry>, OrderingError> {
    let victim = entries
        .iter()
        .find(|e| e.id == *target)
        .ok_or_else(|| OrderingError::EntryNotFound(target.clone()))?;

    if victim.kind.is_theft() {
        return Err(OrderingError::TheftEntryProtected);
    }

    let survivors: Vec<TimelineEntry> = entries.into_iter().filter(|e| e.id != *target).collect();
    Ok(reindex(survivors))
}

/// Defensive check that a sequence sorted ascending is exactly 1..N.
pub fn verify_contiguous(entries: &[TimelineEntry]) -> Result<(), OrderingError> {
    for (position, entry) in entries.iter().enumerate() {
        let expected = position as u32 + 1;
        if entry.entry_order != expected {
            tracing::warn!(
                position,
                expected,
                found = entry.entry_order,
                "entry order drift detected"
            );
            return Err(OrderingError::Drift {
                expected,
                found: entry.entry_order,
                position,
            });
        }
    }
    Ok(())
}

/// The append policy: new captures always extend the route forward.
/// `current_max` is 0 for an empty timeline.
pub fn next_entry_order(current_max: u32) -> u32 {
    current_max.saturating_add(1)
}

/// Pairs `(entry_id, new_order)` for every survivor whose order the
/// reindex changed, ready for a bulk order rewrite.
pub fn order_assignments(
    before: &[TimelineEntry],
    after: &[TimelineEntry],
) -> Vec<(EntryId, u32)> {
    after
        .iter()
        .filter(|reindexed| {
            before
                .iter()
                .find(|original| original.id == reindexed.id)
                .is_none_or(|original| original.entry_order != reindexed.entry_order)
        })
        .map(|e| (e.id.clone(), e.entry_order))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Coordinate, IncidentId, UnixTimeMs};
    use crate::model::EntryKind;
    use proptest::prelude::*;

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

    fn five_entry_timeline() -> Vec<TimelineEntry> {
        vec![
            entry("a", EntryKind::Theft, 1),
            entry("b", EntryKind::Path, 2),
            entry("c", EntryKind::Holding, 3),
            entry("d", EntryKind::Path, 4),
            entry("e", EntryKind::Final, 5),
        ]
    }

    fn orders(entries: &[TimelineEntry]) -> Vec<u32> {
        entries.iter().map(|e| e.entry_order).collect()
    }

    fn ids(entries: &[TimelineEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn reindex_is_identity_on_contiguous_input() {
        let before = five_entry_timeline();
        let after = reindex(before.clone());
        assert_eq!(before, after);
    }

    #[test]
    fn reindex_closes_gaps() {
        let gappy = vec![
            entry("a", EntryKind::Theft, 1),
            entry("c", EntryKind::Holding, 3),
            entry("e", EntryKind::Final, 7),
        ];
        let after = reindex(gappy);
        assert_eq!(orders(&after), vec![1, 2, 3]);
        assert_eq!(ids(&after), vec!["a", "c", "e"]);
    }

    #[test]
    fn reindex_tolerates_unsorted_input() {
        let shuffled = vec![
            entry("d", EntryKind::Path, 4),
            entry("a", EntryKind::Theft, 1),
            entry("c", EntryKind::Holding, 3),
            entry("b", EntryKind::Path, 2),
        ];
        let after = reindex(shuffled);
        assert_eq!(ids(&after), vec!["a", "b", "c", "d"]);
        assert_eq!(orders(&after), vec![1, 2, 3, 4]);
    }

    #[test]
    fn delete_interior_entry_preserves_survivor_order() {
        let after = delete_and_reindex(five_entry_timeline(), &EntryId::new("c")).unwrap();
        assert_eq!(ids(&after), vec!["a", "b", "d", "e"]);
        assert_eq!(orders(&after), vec![1, 2, 3, 4]);
    }

    #[test]
    fn delete_last_entry_keeps_prefix_untouched() {
        let after = delete_and_reindex(five_entry_timeline(), &EntryId::new("e")).unwrap();
        assert_eq!(ids(&after), vec!["a", "b", "c", "d"]);
        assert_eq!(orders(&after), vec![1, 2, 3, 4]);
    }

    #[test]
    fn delete_rejects_theft_entry() {
        let result = delete_and_reindex(five_entry_timeline(), &EntryId::new("a"));
        assert_eq!(result, Err(OrderingError::TheftEntryProtected));
    }

    #[test]
    fn delete_rejects_unknown_entry() {
        let result = delete_and_reindex(five_entry_timeline(), &EntryId::new("zz"));
        assert_eq!(
            result,
            Err(OrderingError::EntryNotFound(EntryId::new("zz")))
        );
    }

    #[test]
    fn verify_accepts_contiguous() {
        assert!(verify_contiguous(&five_entry_timeline()).is_ok());
        assert!(verify_contiguous(&[]).is_ok());
    }

    #[test]
    fn verify_reports_first_gap() {
        let gappy = vec![
            entry("a", EntryKind::Theft, 1),
            entry("c", EntryKind::Holding, 3),
        ];
        assert_eq!(
            verify_contiguous(&gappy),
            Err(OrderingError::Drift {
                expected: 2,
                found: 3,
                position: 1,
            })
        );
    }

    #[test]
    fn next_order_extends_forward() {
        assert_eq!(next_entry_order(0), 1);
        assert_eq!(next_entry_order(5), 6);
        assert_eq!(next_entry_order(u32::MAX), u32::MAX);
    }

    #[test]
    fn assignments_cover_only_shifted_survivors() {
        let before = five_entry_timeline();
        let after = delete_and_reindex(before.clone(), &EntryId::new("b")).unwrap();
        let assignments = order_assignments(&before, &after);
        // "a" kept order 1; the three entries above the deletion all
        // shifted down by one.
        assert_eq!(
            assignments,
            vec![
                (EntryId::new("c"), 2),
                (EntryId::new("d"), 3),
                (EntryId::new("e"), 4),
            ]
        );
    }

    #[test]
    fn assignments_empty_when_nothing_moved() {
        let before = five_entry_timeline();
        let after = reindex(before.clone());
        assert!(order_assignments(&before, &after).is_empty());
    }

    proptest! {
        #[test]
        fn reindex_always_produces_contiguous_sequence(
            raw_orders in proptest::collection::vec(1u32..10_000, 0..40),
        ) {
            let entries: Vec<TimelineEntry> = raw_orders
                .iter()
                .enumerate()
                .map(|(i, order)| entry(&format!("id-{i}"), EntryKind::Path, *order))
                .collect();
            let after = reindex(entries);
            prop_assert!(verify_contiguous(&after).is_ok());
        }

        #[test]
        fn reindex_is_idempotent(
            raw_orders in proptest::collection::vec(1u32..10_000, 0..40),
        ) {
            let entries: Vec<TimelineEntry> = raw_orders
                .iter()
                .enumerate()
                .map(|(i, order)| entry(&format!("id-{i}"), EntryKind::Path, *order))
                .collect();
            let once = reindex(entries);
            let twice = reindex(once.clone());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn delete_preserves_relative_order(victim in 1usize..4) {
            let before = five_entry_timeline();
            let victim_id = before[victim].id.clone();
            let after = delete_and_reindex(before.clone(), &victim_id).unwrap();

            let expected: Vec<&str> = before
                .iter()
                .filter(|e| e.id != victim_id)
                .map(|e| e.id.as_str())
                .collect();
            prop_assert_eq!(ids(&after), expected);
            prop_assert!(verify_contiguous(&after).is_ok());
        }
    }
}
