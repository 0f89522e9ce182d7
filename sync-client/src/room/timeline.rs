//! Observable, ordered view of a room timeline.

use super::persister::TimelineChanges;
use crate::observable::{ListChange, ObservableList};
use std::cmp::Ordering;
use sync_core::{FragmentIndex, SortKey, TimelineEntry};
use tokio::sync::broadcast;

/// Timeline entries of one room in [`FragmentIndex`] order.
#[derive(Debug, Default)]
pub struct RoomTimeline {
    entries: ObservableList<TimelineEntry>,
}

impl RoomTimeline {
    /// Build from stored entries.
    pub fn new(mut entries: Vec<TimelineEntry>, fragments: &FragmentIndex) -> Self {
        entries.sort_by(|a, b| fragments.compare(&a.sort_key, &b.sort_key));
        Self {
            entries: ObservableList::new(entries),
        }
    }

    /// Current entries plus a receiver for later changes.
    pub fn subscribe(&self) -> (Vec<TimelineEntry>, broadcast::Receiver<ListChange<TimelineEntry>>) {
        self.entries.subscribe()
    }

    /// Copy of the current entries.
    pub fn entries(&self) -> Vec<TimelineEntry> {
        self.entries.snapshot()
    }

    /// Entry at `key`.
    pub fn get(&self, key: &SortKey, fragments: &FragmentIndex) -> Option<TimelineEntry> {
        self.entries.with_items(|items| {
            items
                .binary_search_by(|e| fragments.compare(&e.sort_key, key))
                .ok()
                .map(|i| items[i].clone())
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the timeline is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply committed changes and notify observers.
    ///
    /// `fragments` must already include any fragment in `changes`.
    pub fn apply(&self, changes: &TimelineChanges, fragments: &FragmentIndex) {
        let relocated_from = changes.relocated.as_ref().map(|r| r.from);

        for key in &changes.removed {
            if Some(*key) == relocated_from {
                continue;
            }
            if let Some(index) = self.position(key, fragments) {
                self.entries.remove(index);
            }
        }
        for entry in &changes.added {
            let index = self.insertion_point(&entry.sort_key, None, fragments);
            self.entries.insert(index, entry.clone());
        }

        if let Some(relocation) = &changes.relocated {
            let key = relocation.entry.sort_key;
            match self.position(&relocation.from, fragments) {
                Some(from) => {
                    let to = self.insertion_point(&key, Some(from), fragments);
                    self.entries.move_item(from, to);
                    self.entries.update(to, relocation.entry.clone());
                }
                None => {
                    let index = self.insertion_point(&key, None, fragments);
                    self.entries.insert(index, relocation.entry.clone());
                }
            }
        }
    }

    fn position(&self, key: &SortKey, fragments: &FragmentIndex) -> Option<usize> {
        self.entries.with_items(|items| {
            items
                .binary_search_by(|e| fragments.compare(&e.sort_key, key))
                .ok()
        })
    }

    /// Index `key` lands at, not counting the item at `skip`.
    fn insertion_point(&self, key: &SortKey, skip: Option<usize>, fragments: &FragmentIndex) -> usize {
        self.entries.with_items(|items| {
            items
                .iter()
                .enumerate()
                .filter(|(i, e)| {
                    Some(*i) != skip && fragments.compare(&e.sort_key, key) == Ordering::Less
                })
                .count()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{event, room};
    use sync_core::sort_key::MIDDLE;
    use sync_core::{Fragment, Relocation};

    fn entry(fragment: u32, offset: u32, id: &str) -> TimelineEntry {
        TimelineEntry::event(room(), SortKey::new(fragment, MIDDLE + offset), event(id))
    }

    fn ids(timeline: &RoomTimeline) -> Vec<String> {
        timeline
            .entries()
            .iter()
            .filter_map(|e| e.event_id().map(|id| id.to_string()))
            .collect()
    }

    fn linked() -> FragmentIndex {
        // Fragment 3 was opened before fragment 2 in link order.
        let mut first = Fragment::new(room(), 1);
        let mut middle = Fragment::new(room(), 3);
        let mut last = Fragment::new(room(), 2);
        first.next_id = Some(3);
        middle.previous_id = Some(1);
        middle.next_id = Some(2);
        last.previous_id = Some(3);
        FragmentIndex::new([first, middle, last])
    }

    #[test]
    fn orders_by_fragment_links() {
        let fragments = linked();
        let timeline = RoomTimeline::new(
            vec![entry(2, 0, "$c"), entry(1, 0, "$a"), entry(3, 0, "$b")],
            &fragments,
        );
        assert_eq!(ids(&timeline), ["$a", "$b", "$c"]);
    }

    #[test]
    fn apply_removes_adds_and_relocates() {
        let fragments = FragmentIndex::new([Fragment::new(room(), 1)]);
        let timeline = RoomTimeline::new(
            vec![entry(1, 0, "$a"), entry(1, 5, "$d"), entry(1, 9, "$z")],
            &fragments,
        );
        let (_, mut rx) = timeline.subscribe();

        let moved = entry(1, 5, "$d");
        let changes = TimelineChanges {
            added: vec![entry(1, 2, "$b"), entry(1, 3, "$c")],
            removed: vec![SortKey::new(1, MIDDLE + 9), moved.sort_key],
            relocated: Some(Relocation {
                from: moved.sort_key,
                entry: moved.moved_to(SortKey::new(1, MIDDLE + 1)),
            }),
            ..TimelineChanges::default()
        };
        timeline.apply(&changes, &fragments);

        assert_eq!(ids(&timeline), ["$a", "$d", "$b", "$c"]);
        assert_eq!(rx.try_recv().unwrap(), ListChange::Remove { index: 2 });
        assert!(matches!(rx.try_recv().unwrap(), ListChange::Add { index: 1, .. }));
        assert!(matches!(rx.try_recv().unwrap(), ListChange::Add { index: 2, .. }));
        assert_eq!(rx.try_recv().unwrap(), ListChange::Move { from: 3, to: 1 });
        assert!(matches!(rx.try_recv().unwrap(), ListChange::Update { index: 1, .. }));
    }
}
