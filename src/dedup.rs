// src/dedup.rs
use std::collections::HashSet;

use crate::model::{Event, SeenRecord};

/// Events whose id is not in `seen`, in fetch order.
///
/// An id repeated within the same fetch is kept once (first occurrence).
pub fn unseen(events: Vec<Event>, seen: &SeenRecord) -> Vec<Event> {
    let mut batch: HashSet<String> = HashSet::new();
    let mut keep = Vec::with_capacity(events.len());
    for ev in events {
        if seen.contains(&ev.id) || !batch.insert(ev.id.clone()) {
            continue;
        }
        keep.push(ev);
    }
    keep
}

/// Ids to commit to the seen-record after processing `events`.
pub fn processed_ids(events: &[Event]) -> Vec<String> {
    events.iter().map(|e| e.id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(evs: &[Event]) -> Vec<&str> {
        evs.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn drops_seen_and_keeps_order() {
        let seen: SeenRecord = ["e2"].into_iter().collect();
        let evs = vec![
            Event::announcement("e1", "a"),
            Event::announcement("e2", "b"),
            Event::announcement("e3", "c"),
        ];
        let out = unseen(evs, &seen);
        assert_eq!(ids(&out), vec!["e1", "e3"]);
    }

    #[test]
    fn duplicate_ids_in_one_fetch_collapse() {
        let evs = vec![
            Event::announcement("e1", "a"),
            Event::announcement("e1", "a again"),
        ];
        let out = unseen(evs, &SeenRecord::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, crate::model::EventKind::Announcement { body: "a".into() });
    }

    #[test]
    fn empty_fetch_yields_nothing() {
        assert!(unseen(Vec::new(), &SeenRecord::default()).is_empty());
    }
}
