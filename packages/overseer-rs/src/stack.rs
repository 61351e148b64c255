//! Stack entries and the pure stack mutations the engine applies.
//!
//! Index 0 is the top of the stack and the only focused position. Every
//! mutation here returns the entries it removed so the engine can run their
//! `on_end` callbacks after releasing the stack lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::warn;

use crate::next::{AbsolutePosition, RelativePosition, RelativeRange};
use crate::state::State;

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one stack occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EntryId(u64);

impl EntryId {
    fn next() -> Self {
        Self(NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// One occupancy of a state at a stack position.
///
/// The chain (state, its auxiliary, the auxiliary's auxiliary, ...) is
/// computed once when the entry is created.
pub(crate) struct StackEntry {
    id: EntryId,
    chain: SmallVec<[State; 4]>,
}

impl StackEntry {
    /// A fresh entry for `state`, truncating its chain at the first repeated
    /// state or after `max_depth` links.
    pub(crate) fn new(state: State, max_depth: usize) -> Arc<Self> {
        let mut chain: SmallVec<[State; 4]> = SmallVec::new();
        let mut next = state.next_in_chain();
        chain.push(state);

        while let Some(aux) = next {
            if chain.iter().any(|s| State::same(s, &aux)) {
                warn!(
                    state = %chain[0].name(),
                    repeated = %aux.name(),
                    "auxiliary chain has a cycle, truncating"
                );
                break;
            }
            if chain.len() >= max_depth.max(1) {
                warn!(
                    state = %chain[0].name(),
                    max_depth,
                    "auxiliary chain too deep, truncating"
                );
                break;
            }
            next = aux.next_in_chain();
            chain.push(aux);
        }

        Arc::new(Self {
            id: EntryId::next(),
            chain,
        })
    }

    pub(crate) fn id(&self) -> EntryId {
        self.id
    }

    /// The state occupying this entry.
    pub(crate) fn state(&self) -> &State {
        &self.chain[0]
    }

    pub(crate) fn chain(&self) -> &[State] {
        &self.chain
    }

    /// Position of `state` in this entry's chain.
    pub(crate) fn link_of(&self, state: &State) -> Option<usize> {
        self.chain.iter().position(|s| State::same(s, state))
    }
}

impl std::fmt::Debug for StackEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackEntry")
            .field("id", &self.id)
            .field("chain", &self.chain)
            .finish()
    }
}

/// The ordered entries, top first.
#[derive(Debug, Default)]
pub(crate) struct Stack {
    entries: Vec<Arc<StackEntry>>,
}

impl Stack {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn get(&self, index: usize) -> Option<Arc<StackEntry>> {
        self.entries.get(index).cloned()
    }

    pub(crate) fn top(&self) -> Option<Arc<StackEntry>> {
        self.get(0)
    }

    pub(crate) fn index_of(&self, id: EntryId) -> Option<usize> {
        self.entries.iter().position(|e| e.id() == id)
    }

    pub(crate) fn states(&self) -> Vec<State> {
        self.entries.iter().map(|e| e.state().clone()).collect()
    }

    /// Replace the entry at `index`, returning the old one.
    pub(crate) fn replace(&mut self, index: usize, entry: Arc<StackEntry>) -> Arc<StackEntry> {
        std::mem::replace(&mut self.entries[index], entry)
    }

    /// Insert next to the entry at `index`.
    pub(crate) fn insert_relative(
        &mut self,
        index: usize,
        position: RelativePosition,
        entry: Arc<StackEntry>,
    ) {
        let at = match position {
            RelativePosition::Above => index,
            RelativePosition::Below => index + 1,
        };
        self.entries.insert(at, entry);
    }

    /// Insert at the top or bottom.
    pub(crate) fn insert_absolute(&mut self, position: AbsolutePosition, entry: Arc<StackEntry>) {
        match position {
            AbsolutePosition::Top => self.entries.insert(0, entry),
            AbsolutePosition::Bottom => self.entries.push(entry),
        }
    }

    pub(crate) fn remove(&mut self, index: usize) -> Arc<StackEntry> {
        self.entries.remove(index)
    }

    /// Collapse `range` around `index` into `entry`.
    ///
    /// Returns the cleared entries, top first.
    pub(crate) fn clear_range(
        &mut self,
        index: usize,
        range: RelativeRange,
        entry: Arc<StackEntry>,
    ) -> Vec<Arc<StackEntry>> {
        match range {
            RelativeRange::Below { inclusive } => {
                let from = if inclusive { index } else { index + 1 };
                let cleared = self.entries.drain(from..).collect();
                self.entries.push(entry);
                cleared
            }
            RelativeRange::Above { inclusive } => {
                let to = if inclusive { index + 1 } else { index };
                let cleared = self.entries.drain(..to).collect();
                self.entries.insert(0, entry);
                cleared
            }
        }
    }

    /// Replace every entry with `entry`, returning the old ones top first.
    pub(crate) fn clear_all(&mut self, entry: Arc<StackEntry>) -> Vec<Arc<StackEntry>> {
        let cleared = std::mem::take(&mut self.entries);
        self.entries.push(entry);
        cleared
    }

    /// Find where `state`, last seen in entry `id`, lives now.
    ///
    /// The recorded entry wins if it is still on the stack. Otherwise the
    /// first entry whose auxiliary chain contains `state` is used. Returns
    /// the entry and the chain position to dispatch from.
    pub(crate) fn resolve(&self, id: EntryId, state: &State) -> Option<(Arc<StackEntry>, usize)> {
        self.entries.iter().find_map(|entry| {
            if entry.id() == id {
                Some((entry.clone(), entry.link_of(state).unwrap_or(0)))
            } else {
                entry
                    .chain()
                    .iter()
                    .skip(1)
                    .position(|s| State::same(s, state))
                    .map(|pos| (entry.clone(), pos + 1))
            }
        })
    }
}
