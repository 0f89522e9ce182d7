//! Timeline planning: where sync and gap-fill entries go.
//!
//! Both planners are pure. They compute the fragments and entries to write;
//! the client's `RoomPersister` applies the plan inside a storage
//! transaction.

use crate::entry::{Gap, TimelineEntry};
use crate::fragment::{Fragment, FIRST_FRAGMENT_ID};
use crate::sort_key::{KeyError, SortKey};
use sync_types::{MessagesResponse, RoomEvent, RoomId, Timeline};
use thiserror::Error;

/// Errors from timeline planning and gap filling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimelineError {
    /// The `/messages` response cannot fill this gap.
    #[error("invalid gap fill response: {0}")]
    InvalidResponse(String),

    /// The stored gap no longer matches the one the fill was requested for.
    #[error("gap at {0} is stale")]
    StaleGap(SortKey),

    /// The entry at this key is not a gap.
    #[error("entry at {0} is not a gap")]
    NotAGap(SortKey),

    /// Keys ran out.
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// The live end of a room timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivePosition {
    /// Fragment live entries are appended to.
    pub fragment: Fragment,
    /// Highest key written to that fragment, if any.
    pub last_key: Option<SortKey>,
}

/// Fragments and entries to write for one room of a sync response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncTimelinePlan {
    /// Fragments to create or update.
    pub fragments: Vec<Fragment>,
    /// Entries to add, in timeline order.
    pub entries: Vec<TimelineEntry>,
    /// The live position after the plan is applied.
    pub live: Option<LivePosition>,
}

/// Hands out consecutive keys.
struct KeyAllocator {
    start: SortKey,
    last: Option<SortKey>,
}

impl KeyAllocator {
    fn new(start: SortKey, last: Option<SortKey>) -> Self {
        Self { start, last }
    }

    fn next(&mut self) -> Result<SortKey, KeyError> {
        let key = match self.last {
            Some(last) => last.next_key()?,
            None => self.start,
        };
        self.last = Some(key);
        Ok(key)
    }
}

/// Plan the timeline writes for a room's sync timeline.
///
/// `since` is the token the sync request was made with. When the timeline is
/// `limited` and a token exists, the old live fragment is closed with a
/// forward gap carrying it, and a new fragment opens with a backward gap
/// carrying `prev_batch`.
pub fn plan_sync_timeline(
    room_id: &RoomId,
    live: Option<&LivePosition>,
    timeline: &Timeline,
    since: Option<&str>,
) -> Result<SyncTimelinePlan, TimelineError> {
    let mut plan = SyncTimelinePlan::default();

    let (fragment, mut keys) = match live {
        None => {
            let fragment = Fragment::new(room_id.clone(), FIRST_FRAGMENT_ID);
            let keys = KeyAllocator::new(SortKey::first_in_fragment(fragment.id), None);
            (fragment, keys)
        }
        Some(live) if timeline.limited => {
            let mut old = live.fragment.clone();
            if let Some(token) = since {
                let mut old_keys =
                    KeyAllocator::new(SortKey::first_in_fragment(old.id), live.last_key);
                plan.entries.push(TimelineEntry::gap(
                    room_id.clone(),
                    old_keys.next()?,
                    Gap::Forward {
                        next_batch: token.to_string(),
                    },
                ));
            }

            let start = SortKey::first_in_fragment(old.id).next_fragment_key()?;
            let mut fragment = Fragment::new(room_id.clone(), start.fragment_key());
            fragment.previous_id = Some(old.id);
            old.next_id = Some(fragment.id);
            plan.fragments.push(old);
            (fragment, KeyAllocator::new(start, None))
        }
        Some(live) => (
            live.fragment.clone(),
            KeyAllocator::new(SortKey::first_in_fragment(live.fragment.id), live.last_key),
        ),
    };

    let opens_fragment = live.map_or(true, |l| l.fragment.id != fragment.id);
    if opens_fragment {
        if let Some(prev_batch) = &timeline.prev_batch {
            plan.entries.push(TimelineEntry::gap(
                room_id.clone(),
                keys.next()?,
                Gap::Backward {
                    prev_batch: prev_batch.clone(),
                },
            ));
        }
    }

    for event in &timeline.events {
        plan.entries
            .push(TimelineEntry::event(room_id.clone(), keys.next()?, event.clone()));
    }

    if opens_fragment {
        plan.fragments.push(fragment.clone());
    }
    plan.live = Some(LivePosition {
        fragment,
        last_key: keys.last,
    });
    Ok(plan)
}

/// Relocation of the stored neighbor a gap fill met.
#[derive(Debug, Clone, PartialEq)]
pub struct Relocation {
    /// Key the neighbor was stored at.
    pub from: SortKey,
    /// The neighbor at its new key.
    pub entry: TimelineEntry,
}

/// Writes that fill one gap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GapFillPlan {
    /// Keys to delete. Always starts with the gap itself.
    pub removed: Vec<SortKey>,
    /// New entries, moving away from the gap. Ends with a new gap when the
    /// far side was not reached.
    pub added: Vec<TimelineEntry>,
    /// The neighbor moved next to the filled events, if it was reached.
    pub relocated: Option<Relocation>,
}

impl GapFillPlan {
    /// Number of events added (the trailing gap is not counted).
    pub fn added_events(&self) -> usize {
        self.added.iter().filter(|e| e.as_event().is_some()).count()
    }
}

/// Check a `/messages` response against the gap token it was requested for.
///
/// An empty chunk is the edge of history and needs no `end`.
pub fn validate_gap_response(token: &str, response: &MessagesResponse) -> Result<(), TimelineError> {
    let chunk = response
        .chunk
        .as_ref()
        .ok_or_else(|| TimelineError::InvalidResponse("missing chunk".into()))?;
    if response.start != token {
        return Err(TimelineError::InvalidResponse(format!(
            "start token {:?} does not match gap token {:?}",
            response.start, token
        )));
    }
    if !chunk.is_empty() && response.end.is_none() {
        return Err(TimelineError::InvalidResponse("missing end token".into()));
    }
    Ok(())
}

/// Plan the writes that fill `gap_entry` with `response`.
///
/// `far_side` holds the stored entries on the other side of the gap, nearest
/// first. The first event among them is the neighbor: the walk through the
/// chunk stops when it meets it.
pub fn plan_gap_fill(
    gap_entry: &TimelineEntry,
    far_side: &[TimelineEntry],
    response: &MessagesResponse,
) -> Result<GapFillPlan, TimelineError> {
    let gap = gap_entry
        .as_gap()
        .ok_or(TimelineError::NotAGap(gap_entry.sort_key))?;
    validate_gap_response(gap.token(), response)?;

    let mut plan = GapFillPlan {
        removed: vec![gap_entry.sort_key],
        ..GapFillPlan::default()
    };
    let chunk = response.chunk.as_deref().unwrap_or_default();
    if chunk.is_empty() {
        return Ok(plan);
    }

    let backward = gap.is_backward();
    let events: Vec<&RoomEvent> = if backward {
        chunk.iter().rev().collect()
    } else {
        chunk.iter().collect()
    };
    let neighbor = far_side
        .iter()
        .position(|e| e.as_event().is_some())
        .map(|pos| (pos, &far_side[pos]));

    let room_id = &gap_entry.room_id;
    let mut key = gap_entry.sort_key;
    for event in events {
        key = key.step(backward)?;
        if let Some((pos, entry)) = neighbor {
            if entry.event_id() == Some(&event.event_id) {
                plan.removed
                    .extend(far_side[..=pos].iter().map(|e| e.sort_key));
                plan.relocated = Some(Relocation {
                    from: entry.sort_key,
                    entry: entry.moved_to(key),
                });
                return Ok(plan);
            }
        }
        plan.added
            .push(TimelineEntry::event(room_id.clone(), key, event.clone()));
    }

    let end = response.end.clone().unwrap_or_default();
    key = key.step(backward)?;
    plan.added
        .push(TimelineEntry::gap(room_id.clone(), key, gap.with_token(end)));
    Ok(plan)
}
