//! Observable ordered lists.
//!
//! Observers get a snapshot on subscribe and then every change as a
//! [`ListChange`] over a broadcast channel. A lagging observer should
//! resubscribe to get a fresh snapshot.

use crate::util::lock;
use std::sync::Mutex;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// One change to an [`ObservableList`].
#[derive(Debug, Clone, PartialEq)]
pub enum ListChange<T> {
    /// `value` was inserted at `index`.
    Add {
        /// Position of the new item.
        index: usize,
        /// The item.
        value: T,
    },
    /// The item at `index` was replaced.
    Update {
        /// Position of the item.
        index: usize,
        /// The new value.
        value: T,
    },
    /// The item at `index` was removed.
    Remove {
        /// Former position.
        index: usize,
    },
    /// The item at `from` moved to `to`.
    Move {
        /// Former position.
        from: usize,
        /// New position.
        to: usize,
    },
    /// The whole list was replaced.
    Reset(Vec<T>),
}

/// A list whose changes can be observed.
#[derive(Debug)]
pub struct ObservableList<T: Clone> {
    items: Mutex<Vec<T>>,
    changes: broadcast::Sender<ListChange<T>>,
}

impl<T: Clone> Default for ObservableList<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T: Clone> ObservableList<T> {
    /// Create a list with initial items.
    pub fn new(items: Vec<T>) -> Self {
        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            items: Mutex::new(items),
            changes,
        }
    }

    /// Current items plus a receiver for later changes.
    pub fn subscribe(&self) -> (Vec<T>, broadcast::Receiver<ListChange<T>>) {
        let items = lock(&self.items);
        (items.clone(), self.changes.subscribe())
    }

    /// Copy of the current items.
    pub fn snapshot(&self) -> Vec<T> {
        lock(&self.items).clone()
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    /// Check if the list is empty.
    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    /// Insert at `index` (clamped to the length).
    pub fn insert(&self, index: usize, value: T) {
        let mut items = lock(&self.items);
        let index = index.min(items.len());
        items.insert(index, value.clone());
        self.emit(ListChange::Add { index, value });
    }

    /// Replace the item at `index`. Out of range is ignored.
    pub fn update(&self, index: usize, value: T) {
        let mut items = lock(&self.items);
        if let Some(slot) = items.get_mut(index) {
            *slot = value.clone();
            self.emit(ListChange::Update { index, value });
        }
    }

    /// Remove the item at `index`. Out of range is ignored.
    pub fn remove(&self, index: usize) -> Option<T> {
        let mut items = lock(&self.items);
        if index >= items.len() {
            return None;
        }
        let value = items.remove(index);
        self.emit(ListChange::Remove { index });
        Some(value)
    }

    /// Move the item at `from` so it ends up at `to`.
    pub fn move_item(&self, from: usize, to: usize) {
        let mut items = lock(&self.items);
        if from >= items.len() || to >= items.len() || from == to {
            return;
        }
        let value = items.remove(from);
        items.insert(to, value);
        self.emit(ListChange::Move { from, to });
    }

    /// Replace every item.
    pub fn reset(&self, values: Vec<T>) {
        let mut items = lock(&self.items);
        *items = values.clone();
        self.emit(ListChange::Reset(values));
    }

    /// Run `f` over the items, for lookups that need the current order.
    pub fn with_items<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&lock(&self.items))
    }

    // No receivers is fine.
    fn emit(&self, change: ListChange<T>) {
        let _ = self.changes.send(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_sees_snapshot_then_changes() {
        let list = ObservableList::new(vec!["a", "b"]);
        let (snapshot, mut rx) = list.subscribe();
        assert_eq!(snapshot, vec!["a", "b"]);

        list.insert(1, "x");
        list.update(0, "A");
        list.move_item(2, 0);
        list.remove(1);

        assert_eq!(rx.try_recv().unwrap(), ListChange::Add { index: 1, value: "x" });
        assert_eq!(rx.try_recv().unwrap(), ListChange::Update { index: 0, value: "A" });
        assert_eq!(rx.try_recv().unwrap(), ListChange::Move { from: 2, to: 0 });
        assert_eq!(rx.try_recv().unwrap(), ListChange::Remove { index: 1 });
        assert_eq!(list.snapshot(), vec!["b", "x"]);
    }

    #[test]
    fn out_of_range_changes_are_ignored() {
        let list = ObservableList::new(vec![1]);
        let (_, mut rx) = list.subscribe();

        list.update(5, 2);
        assert_eq!(list.remove(3), None);
        list.move_item(0, 0);

        assert!(rx.try_recv().is_err());
        assert_eq!(list.snapshot(), vec![1]);
    }

    #[test]
    fn reset_replaces_items() {
        let list = ObservableList::default();
        let (_, mut rx) = list.subscribe();
        list.reset(vec![3, 4]);

        assert_eq!(rx.try_recv().unwrap(), ListChange::Reset(vec![3, 4]));
        assert_eq!(list.len(), 2);
    }
}
