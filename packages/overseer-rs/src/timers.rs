//! Live timers, keyed by owner and timer key.
//!
//! Every scheduled timer gets a fresh [`TimerId`]. A fire is only delivered
//! while the registry still maps its `(owner, key)` to that id, so a late
//! fire from an overridden or cancelled timer is recognised and dropped.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::async_update::TimerKey;
use crate::gateway::AsyncHandle;
use crate::stack::EntryId;
use crate::state::State;

/// The state that requested async work, as occupant of a specific entry.
#[derive(Clone)]
pub(crate) struct Owner {
    pub(crate) entry: EntryId,
    pub(crate) state: State,
}

impl Owner {
    pub(crate) fn new(entry: EntryId, state: State) -> Self {
        Self { entry, state }
    }
}

impl PartialEq for Owner {
    fn eq(&self, other: &Self) -> bool {
        self.entry == other.entry && State::same(&self.state, &other.state)
    }
}

impl Eq for Owner {}

impl Hash for Owner {
    fn hash<H: Hasher>(&self, h: &mut H) {
        self.entry.hash(h);
        self.state.addr().hash(h);
    }
}

impl std::fmt::Debug for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Owner({:?}, {})", self.entry, self.state.name())
    }
}

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Generation of one scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerId(u64);

impl TimerId {
    fn next() -> Self {
        Self(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

struct TimerSlot {
    id: TimerId,
    handle: Option<Arc<dyn AsyncHandle>>,
}

/// Registry of live timers.
#[derive(Default)]
pub(crate) struct TimerRegistry {
    slots: DashMap<(Owner, TimerKey), TimerSlot>,
}

impl TimerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, owner: &Owner, key: &TimerKey) -> bool {
        self.slots.contains_key(&(owner.clone(), key.clone()))
    }

    /// Claim `(owner, key)` for a timer about to be scheduled.
    ///
    /// The slot exists before the gateway is asked, so a fire racing the
    /// scheduling call still finds its id.
    pub(crate) fn reserve(&self, owner: &Owner, key: &TimerKey) -> TimerId {
        let id = TimerId::next();
        self.slots
            .insert((owner.clone(), key.clone()), TimerSlot { id, handle: None });
        id
    }

    /// Store the handle for a reserved timer. Dropped if the slot moved on.
    pub(crate) fn attach(
        &self,
        owner: &Owner,
        key: &TimerKey,
        id: TimerId,
        handle: Arc<dyn AsyncHandle>,
    ) {
        match self.slots.get_mut(&(owner.clone(), key.clone())) {
            Some(mut slot) if slot.id == id => slot.handle = Some(handle),
            _ => {}
        }
    }

    /// Remove the slot for `id`, if it is still the live one.
    pub(crate) fn release(&self, owner: &Owner, key: &TimerKey, id: TimerId) -> bool {
        self.slots
            .remove_if(&(owner.clone(), key.clone()), |_, slot| slot.id == id)
            .is_some()
    }

    /// True if `id` is still the live timer for `(owner, key)`.
    pub(crate) fn is_current(&self, owner: &Owner, key: &TimerKey, id: TimerId) -> bool {
        self.slots
            .get(&(owner.clone(), key.clone()))
            .is_some_and(|slot| slot.id == id)
    }

    /// Cancel and forget the timer for `(owner, key)`. False if none existed.
    pub(crate) fn cancel(&self, owner: &Owner, key: &TimerKey) -> bool {
        match self.slots.remove(&(owner.clone(), key.clone())) {
            Some((_, slot)) => {
                if let Some(handle) = slot.handle {
                    handle.cancel();
                }
                true
            }
            None => false,
        }
    }

    /// Cancel and forget every timer of `owner`. Returns how many were dropped.
    pub(crate) fn purge(&self, owner: &Owner) -> usize {
        let mut handles = Vec::new();
        let mut removed = 0;
        self.slots.retain(|(o, _), slot| {
            if o == owner {
                handles.extend(slot.handle.take());
                removed += 1;
                false
            } else {
                true
            }
        });
        for handle in handles {
            handle.cancel();
        }
        removed
    }

    /// Cancel and forget every timer. Returns how many were dropped.
    pub(crate) fn cancel_all(&self) -> usize {
        let handles: Vec<_> = self
            .slots
            .iter_mut()
            .filter_map(|mut slot| slot.value_mut().handle.take())
            .collect();
        let removed = self.slots.len();
        self.slots.clear();
        for handle in handles {
            handle.cancel();
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
