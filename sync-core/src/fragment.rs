//! Timeline fragments and their ordering.
//!
//! A fragment is a run of timeline entries known to be contiguous. A limited
//! sync starts a new fragment after the live one, so fragments are linked
//! into chains by `previous_id` / `next_id`. The [`FragmentIndex`] turns
//! those links into a position per fragment so sort keys from different
//! fragments can be compared.

use crate::sort_key::SortKey;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use sync_types::RoomId;

/// Id of the first fragment in a room.
pub const FIRST_FRAGMENT_ID: u32 = 1;

/// A contiguous run of timeline entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Room the fragment belongs to.
    pub room_id: RoomId,
    /// Fragment id, equal to the `fragment_key` of its entries.
    pub id: u32,
    /// The fragment that comes before this one, if known.
    #[serde(default)]
    pub previous_id: Option<u32>,
    /// The fragment that comes after this one, if known.
    #[serde(default)]
    pub next_id: Option<u32>,
}

impl Fragment {
    /// Create an unlinked fragment.
    pub fn new(room_id: RoomId, id: u32) -> Self {
        Self {
            room_id,
            id,
            previous_id: None,
            next_id: None,
        }
    }
}

/// Ordering of the fragments of one room.
#[derive(Debug, Clone, Default)]
pub struct FragmentIndex {
    fragments: BTreeMap<u32, Fragment>,
    positions: HashMap<u32, usize>,
}

impl FragmentIndex {
    /// Build an index from stored fragments.
    pub fn new(fragments: impl IntoIterator<Item = Fragment>) -> Self {
        let mut index = Self {
            fragments: fragments.into_iter().map(|f| (f.id, f)).collect(),
            positions: HashMap::new(),
        };
        index.rebuild();
        index
    }

    /// Add or replace a fragment and recompute positions.
    pub fn upsert(&mut self, fragment: Fragment) {
        self.fragments.insert(fragment.id, fragment);
        self.rebuild();
    }

    /// Look up a fragment by id.
    pub fn get(&self, id: u32) -> Option<&Fragment> {
        self.fragments.get(&id)
    }

    /// All fragments, by id.
    pub fn fragments(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.values()
    }

    /// Number of fragments.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Check if the index has no fragments.
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// The fragment live sync entries are appended to.
    pub fn live_fragment(&self) -> Option<&Fragment> {
        self.fragments.values().next_back()
    }

    /// Id for a new fragment.
    pub fn next_fragment_id(&self) -> u32 {
        self.fragments
            .keys()
            .next_back()
            .map_or(FIRST_FRAGMENT_ID, |id| id.saturating_add(1))
    }

    /// Compare two sort keys of this room.
    ///
    /// Sentinels and keys in the same fragment compare directly. Otherwise
    /// fragment positions decide; fragments missing from the index fall back
    /// to id order.
    pub fn compare(&self, a: &SortKey, b: &SortKey) -> Ordering {
        if a.is_sentinel() || b.is_sentinel() || a.fragment_key() == b.fragment_key() {
            return a.cmp(b);
        }
        match (
            self.positions.get(&a.fragment_key()),
            self.positions.get(&b.fragment_key()),
        ) {
            (Some(pa), Some(pb)) => pa.cmp(pb).then_with(|| a.cmp(b)),
            _ => a.cmp(b),
        }
    }

    fn rebuild(&mut self) {
        self.positions.clear();
        let mut visited = HashSet::new();
        let mut position = 0usize;

        // Chain heads: no predecessor, or a predecessor we do not know.
        let heads: Vec<u32> = self
            .fragments
            .values()
            .filter(|f| match f.previous_id {
                None => true,
                Some(prev) => !self.fragments.contains_key(&prev),
            })
            .map(|f| f.id)
            .collect();

        for head in heads {
            let mut current = Some(head);
            while let Some(id) = current {
                if !visited.insert(id) {
                    break;
                }
                self.positions.insert(id, position);
                position += 1;
                current = self.fragments.get(&id).and_then(|f| f.next_id);
            }
        }

        // Fragments only reachable through a cycle.
        for id in self.fragments.keys() {
            if visited.insert(*id) {
                self.positions.insert(*id, position);
                position += 1;
            }
        }
    }
}
