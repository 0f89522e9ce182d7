//! Compact timeline sort keys.
//!
//! A key is a `(fragment_key, event_key)` pair. Keys in the same fragment
//! compare by event key. Keys in different fragments must be compared through
//! a [`FragmentIndex`](crate::fragment::FragmentIndex), because fragments are
//! created in arrival order, not in timeline order.
//!
//! Live events of a fresh fragment start at the middle of the event key
//! space, leaving room to prepend backfilled history below it.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Event key of the first entry in a fragment.
pub const MIDDLE: u32 = 0x8000_0000;

/// Error returned when a key cannot be advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Event keys in this fragment are used up in the requested direction.
    #[error("event key space exhausted in fragment {fragment_key}")]
    EventKeysExhausted {
        /// Fragment whose key space ran out.
        fragment_key: u32,
    },
    /// No fragment ids are left.
    #[error("fragment key space exhausted")]
    FragmentKeysExhausted,
}

/// Position of a timeline entry within its room.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SortKey {
    fragment_key: u32,
    event_key: u32,
}

impl SortKey {
    /// Sorts before every other key.
    pub const MIN: SortKey = SortKey {
        fragment_key: 0,
        event_key: 0,
    };

    /// Sorts after every other key.
    pub const MAX: SortKey = SortKey {
        fragment_key: u32::MAX,
        event_key: u32::MAX,
    };

    /// Create a key from its parts.
    pub const fn new(fragment_key: u32, event_key: u32) -> Self {
        Self {
            fragment_key,
            event_key,
        }
    }

    /// First key of a fragment.
    pub const fn first_in_fragment(fragment_key: u32) -> Self {
        Self::new(fragment_key, MIDDLE)
    }

    /// Fragment part.
    pub fn fragment_key(&self) -> u32 {
        self.fragment_key
    }

    /// Event part.
    pub fn event_key(&self) -> u32 {
        self.event_key
    }

    /// Whether this is one of the [`MIN`](Self::MIN) / [`MAX`](Self::MAX) sentinels.
    pub fn is_sentinel(&self) -> bool {
        *self == Self::MIN || *self == Self::MAX
    }

    /// The key right after this one in the same fragment.
    pub fn next_key(&self) -> Result<SortKey, KeyError> {
        self.event_key
            .checked_add(1)
            .map(|event_key| Self::new(self.fragment_key, event_key))
            .ok_or(KeyError::EventKeysExhausted {
                fragment_key: self.fragment_key,
            })
    }

    /// The key right before this one in the same fragment.
    pub fn previous_key(&self) -> Result<SortKey, KeyError> {
        self.event_key
            .checked_sub(1)
            .map(|event_key| Self::new(self.fragment_key, event_key))
            .ok_or(KeyError::EventKeysExhausted {
                fragment_key: self.fragment_key,
            })
    }

    /// The first key of the fragment after this one.
    pub fn next_fragment_key(&self) -> Result<SortKey, KeyError> {
        match self.fragment_key.checked_add(1) {
            Some(fragment_key) if fragment_key < u32::MAX => {
                Ok(Self::first_in_fragment(fragment_key))
            }
            _ => Err(KeyError::FragmentKeysExhausted),
        }
    }

    /// Step one key in a fill direction: towards older entries when
    /// `backward`, towards newer otherwise.
    pub fn step(&self, backward: bool) -> Result<SortKey, KeyError> {
        if backward {
            self.previous_key()
        } else {
            self.next_key()
        }
    }
}

impl fmt::Debug for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SortKey({}:{:#x})", self.fragment_key, self.event_key)
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.fragment_key, self.event_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_and_previous_order() {
        let key = SortKey::first_in_fragment(1);
        let next = key.next_key().unwrap();
        let prev = key.previous_key().unwrap();

        assert!(prev < key);
        assert!(key < next);
        assert_eq!(next.previous_key().unwrap(), key);
    }

    #[test]
    fn sentinels_bound_everything() {
        let key = SortKey::first_in_fragment(7);
        assert!(SortKey::MIN < key);
        assert!(key < SortKey::MAX);
        assert!(SortKey::MIN.is_sentinel());
        assert!(SortKey::MAX.is_sentinel());
        assert!(!key.is_sentinel());
    }

    #[test]
    fn next_fragment_starts_in_middle() {
        let key = SortKey::new(3, 42);
        let next = key.next_fragment_key().unwrap();
        assert_eq!(next, SortKey::new(4, MIDDLE));
    }

    #[test]
    fn exhaustion_is_reported_not_wrapped() {
        let top = SortKey::new(2, u32::MAX);
        assert_eq!(
            top.next_key(),
            Err(KeyError::EventKeysExhausted { fragment_key: 2 })
        );

        let bottom = SortKey::new(2, 0);
        assert!(bottom.previous_key().is_err());

        let last_fragment = SortKey::new(u32::MAX - 1, 0);
        assert_eq!(
            last_fragment.next_fragment_key(),
            Err(KeyError::FragmentKeysExhausted)
        );
    }

    #[test]
    fn step_follows_direction() {
        let key = SortKey::first_in_fragment(1);
        assert_eq!(key.step(true).unwrap(), key.previous_key().unwrap());
        assert_eq!(key.step(false).unwrap(), key.next_key().unwrap());
    }

    #[test]
    fn serializes_as_struct() {
        let key = SortKey::new(1, 2);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"{"fragment_key":1,"event_key":2}"#);
    }
}
