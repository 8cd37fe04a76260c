//! One-way hand-off queues from the simulation to its collaborators.
//!
//! The simulation pushes [`VisualUpdate`]s for a renderer and
//! [`PeerNotice`]s for a network layer. Each queued item carries an
//! [`EpochGuard`] for the turn it was produced in, so any agent state the
//! consumer may look up stays alive until the item is dropped.
//!
//! [`UpdateQueue::flush_and_wait`] blocks the caller until the consumer has
//! emptied the queue at least once since the call started.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::epoch::EpochGuard;
use crate::faction::FactionId;
use crate::math::{fixed_serde, Fixed};
use crate::snapshot::MapSnapshot;
use crate::tile::{TileCoord, TileType};

/// Change the renderer needs to mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisualUpdate {
    /// A tile's type, fullness or owner changed.
    TileChanged {
        /// Tile coordinate.
        coord: TileCoord,
        /// New type.
        kind: TileType,
        /// New fullness.
        #[serde(with = "fixed_serde")]
        fullness: Fixed,
        /// New owner.
        owner: Option<FactionId>,
    },
    /// An agent moved to another tile.
    AgentMoved {
        /// Agent handle.
        id: AgentId,
        /// Tile left.
        from: TileCoord,
        /// Tile entered.
        to: TileCoord,
    },
    /// An agent was created.
    AgentSpawned {
        /// Agent handle.
        id: AgentId,
        /// Class name.
        class: String,
        /// Tile the agent appeared on.
        tile: TileCoord,
    },
    /// An agent died and was removed from the map.
    AgentRemoved {
        /// Agent handle (now stale).
        id: AgentId,
        /// Tile the agent was standing on.
        tile: TileCoord,
    },
}

/// Message for connected peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PeerNotice {
    /// The host finished a turn; peers should apply the attached state.
    TurnAdvanced {
        /// Turn the state belongs to.
        turn: u64,
        /// Authoritative state after the turn.
        snapshot: MapSnapshot,
    },
}

/// An event together with the turn guard that keeps its referents alive.
#[derive(Debug)]
pub struct Queued<E> {
    event: E,
    guard: EpochGuard,
}

impl<E> Queued<E> {
    /// The event.
    #[must_use]
    pub const fn event(&self) -> &E {
        &self.event
    }

    /// Turn the event was produced in.
    #[must_use]
    pub const fn turn(&self) -> u64 {
        self.guard.turn()
    }

    /// Take the event, releasing the turn guard.
    pub fn into_event(self) -> E {
        self.event
    }
}

#[derive(Debug)]
struct QueueState<E> {
    items: VecDeque<Queued<E>>,
    /// Threads blocked in `flush_and_wait`.
    waiters: usize,
    /// Bumped every time the queue becomes empty.
    drained: u64,
}

/// Multi-producer hand-off queue with a drain barrier.
#[derive(Debug)]
pub struct UpdateQueue<E> {
    state: Mutex<QueueState<E>>,
    changed: Condvar,
}

impl<E> Default for UpdateQueue<E> {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                waiters: 0,
                drained: 0,
            }),
            changed: Condvar::new(),
        }
    }
}

impl<E> UpdateQueue<E> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event, keeping `guard` alive until the item is dropped.
    pub fn push(&self, event: E, guard: EpochGuard) {
        self.lock().items.push_back(Queued { event, guard });
        self.changed.notify_all();
    }

    /// Take the oldest item without blocking.
    pub fn pop(&self) -> Option<Queued<E>> {
        let mut state = self.lock();
        let item = state.items.pop_front();
        self.after_pop(&mut state);
        item
    }

    /// Take the oldest item, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Queued<E>> {
        let state = self.lock();
        let (mut state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| s.items.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        let item = state.items.pop_front();
        self.after_pop(&mut state);
        item
    }

    /// Take every queued item, oldest first.
    pub fn drain(&self) -> Vec<Queued<E>> {
        let mut state = self.lock();
        let items = state.items.drain(..).collect();
        self.after_pop(&mut state);
        items
    }

    fn after_pop(&self, state: &mut QueueState<E>) {
        if state.items.is_empty() {
            state.drained += 1;
            if state.waiters > 0 {
                self.changed.notify_all();
            }
        }
    }

    /// Block until the queue has been emptied by its consumer.
    ///
    /// Returns immediately if the queue is already empty. Producers that keep
    /// pushing cannot starve the caller: it is released by the first drain
    /// after the call started.
    pub fn flush_and_wait(&self) {
        let mut state = self.lock();
        if state.items.is_empty() {
            return;
        }
        let seen = state.drained;
        state.waiters += 1;
        let mut state = self
            .changed
            .wait_while(state, |s| s.drained == seen)
            .unwrap_or_else(PoisonError::into_inner);
        state.waiters -= 1;
    }

    /// Queued item count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// True if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Threads currently blocked in [`UpdateQueue::flush_and_wait`].
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.lock().waiters
    }
}
