//! # sync-core
//!
//! Pure logic for roomsync (no I/O, instant tests).
//!
//! This crate implements the state machines and algorithms of the sync
//! engine without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (network, storage) is performed by `sync-client`, which
//! interprets the actions and plans produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod entry;
pub mod fragment;
pub mod queue;
pub mod reconnect;
pub mod sort_key;
pub mod status;
pub mod summary;
pub mod timeline;

pub use backoff::Backoff;
pub use entry::{EntryContent, Gap, TimelineEntry};
pub use fragment::{Fragment, FragmentIndex};
pub use queue::{PendingEvent, PendingQueue, QueueError};
pub use reconnect::{Action, ConnectionStatus, Event, ReconnectState};
pub use sort_key::{KeyError, SortKey};
pub use status::SyncStatus;
pub use summary::{Membership, RoomSummary};
pub use timeline::{
    plan_gap_fill, plan_sync_timeline, validate_gap_response, GapFillPlan, LivePosition,
    Relocation, SyncTimelinePlan, TimelineError,
};
