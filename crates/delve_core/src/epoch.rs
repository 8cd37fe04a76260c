//! Turn-epoch reference counting and deferred deletion.
//!
//! Every thread (or queued notification) that may observe state from turn
//! `T` checks in for `T` and holds an [`EpochGuard`] until it is done.
//! Objects removed from the world during turn `T` are handed to
//! [`EpochReclaimer::defer`] instead of being dropped. [`EpochReclaimer::retire`]
//! walks turns oldest first, retiring every turn whose count has reached
//! zero and stopping at the first one still in use, then drops every
//! deferred object from a retired turn.
//!
//! Counts and the deletion queue sit behind separate mutexes and are never
//! locked together.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Outstanding check-ins per turn.
#[derive(Debug, Default)]
struct TurnCounts {
    turns: Mutex<BTreeMap<u64, u64>>,
}

impl TurnCounts {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, u64>> {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_in(&self, turn: u64) {
        *self.lock().entry(turn).or_insert(0) += 1;
    }

    fn check_out(&self, turn: u64) {
        let mut turns = self.lock();
        match turns.get_mut(&turn) {
            Some(count) if *count > 0 => *count -= 1,
            _ => {
                drop(turns);
                panic!("check-out for turn {turn} with no outstanding check-in");
            }
        }
    }
}

/// Proof that a turn is in use. Dropping it checks out.
///
/// Guards are `Send` so they can travel with queued notifications to the
/// thread that eventually consumes them.
#[must_use = "dropping the guard immediately checks out of the turn"]
pub struct EpochGuard {
    counts: Arc<TurnCounts>,
    turn: u64,
}

// Guards travel across threads with queued items.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<EpochGuard>();
};

impl EpochGuard {
    /// Turn this guard holds open.
    #[must_use]
    pub const fn turn(&self) -> u64 {
        self.turn
    }
}

impl fmt::Debug for EpochGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpochGuard").field("turn", &self.turn).finish()
    }
}

impl Drop for EpochGuard {
    fn drop(&mut self) {
        self.counts.check_out(self.turn);
    }
}

/// Summary of one [`EpochReclaimer::retire`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimReport {
    /// Turns retired by this call, oldest first.
    pub retired: Vec<u64>,
    /// Objects dropped by this call.
    pub destroyed: usize,
    /// Objects still waiting for their turn to retire.
    pub pending: usize,
}

/// Per-turn reference counts plus a queue of objects awaiting destruction.
pub struct EpochReclaimer<T> {
    counts: Arc<TurnCounts>,
    pending: Mutex<VecDeque<(u64, T)>>,
}

impl<T> Default for EpochReclaimer<T> {
    fn default() -> Self {
        Self {
            counts: Arc::new(TurnCounts::default()),
            pending: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T> fmt::Debug for EpochReclaimer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let turns = self.counts.lock().clone();
        f.debug_struct("EpochReclaimer")
            .field("turns", &turns)
            .field("pending", &self.pending_len())
            .finish()
    }
}

impl<T> EpochReclaimer<T> {
    /// Create an empty reclaimer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<(u64, T)>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a user of `turn`. The turn cannot retire until the
    /// returned guard is dropped.
    pub fn check_in(&self, turn: u64) -> EpochGuard {
        self.counts.check_in(turn);
        EpochGuard {
            counts: Arc::clone(&self.counts),
            turn,
        }
    }

    /// Queue `object` for destruction once `turn` retires.
    pub fn defer(&self, turn: u64, object: T) {
        self.counts.lock().entry(turn).or_insert(0);
        self.pending().push_back((turn, object));
    }

    /// Outstanding check-ins for `turn`, or `None` if the turn is not
    /// tracked (never used, or already retired).
    #[must_use]
    pub fn outstanding(&self, turn: u64) -> Option<u64> {
        self.counts.lock().get(&turn).copied()
    }

    /// Objects waiting for destruction.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending().len()
    }

    /// Retire finished turns and drop the objects deferred under them.
    pub fn retire(&self) -> ReclaimReport {
        let retired = {
            let mut turns = self.counts.lock();
            let mut retired = Vec::new();
            while let Some((&turn, &count)) = turns.first_key_value() {
                if count > 0 {
                    break;
                }
                turns.remove(&turn);
                retired.push(turn);
            }
            retired
        };

        let doomed: Vec<(u64, T)> = match retired.last() {
            Some(&latest) => {
                let mut pending = self.pending();
                let (mut doomed, kept): (Vec<_>, Vec<_>) =
                    pending.drain(..).partition(|(turn, _)| *turn <= latest);
                *pending = VecDeque::from(kept);
                doomed.sort_by_key(|(turn, _)| *turn);
                doomed
            }
            None => Vec::new(),
        };

        for turn in &retired {
            trace!(turn, "Turn retired");
        }

        let destroyed = doomed.len();
        drop(doomed);

        ReclaimReport {
            retired,
            destroyed,
            pending: self.pending_len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;
    use std::thread;

    #[test]
    fn test_deferred_object_survives_until_checkout() {
        let reclaimer = EpochReclaimer::new();
        let object = Arc::new(7u32);
        let weak: Weak<u32> = Arc::downgrade(&object);

        let guard = reclaimer.check_in(3);
        reclaimer.defer(3, object);

        let report = reclaimer.retire();
        assert!(report.retired.is_empty());
        assert_eq!(report.pending, 1);
        assert!(weak.upgrade().is_some());

        drop(guard);
        let report = reclaimer.retire();
        assert_eq!(report.retired, vec![3]);
        assert_eq!(report.destroyed, 1);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_retire_stops_at_first_busy_turn() {
        let reclaimer = EpochReclaimer::new();
        reclaimer.defer(1, "a");
        let busy = reclaimer.check_in(2);
        reclaimer.defer(2, "b");
        reclaimer.defer(3, "c");

        let report = reclaimer.retire();
        assert_eq!(report.retired, vec![1]);
        assert_eq!(report.destroyed, 1);
        assert_eq!(reclaimer.outstanding(3), Some(0));

        drop(busy);
        let report = reclaimer.retire();
        assert_eq!(report.retired, vec![2, 3]);
        assert_eq!(report.destroyed, 2);
        assert_eq!(report.pending, 0);
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Drop for Recorder {
        fn drop(&mut self) {
            self.log.lock().unwrap().push(self.name);
        }
    }

    #[test]
    fn test_objects_destroyed_oldest_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let reclaimer = EpochReclaimer::new();
        let busy = reclaimer.check_in(4);
        for (turn, name) in [(2, "second"), (1, "first"), (4, "kept"), (2, "third")] {
            reclaimer.defer(turn, Recorder { name, log: Arc::clone(&log) });
        }

        let report = reclaimer.retire();
        assert_eq!(report.retired, vec![1, 2]);
        assert_eq!(report.destroyed, 3);
        assert_eq!(report.pending, 1);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);

        drop(busy);
        assert_eq!(reclaimer.retire().destroyed, 1);
        assert_eq!(log.lock().unwrap().last(), Some(&"kept"));
    }

    #[test]
    fn test_counts_track_guards() {
        let reclaimer: EpochReclaimer<()> = EpochReclaimer::new();
        let a = reclaimer.check_in(5);
        let b = reclaimer.check_in(5);
        assert_eq!(reclaimer.outstanding(5), Some(2));
        assert_eq!(a.turn(), 5);

        drop(a);
        assert_eq!(reclaimer.outstanding(5), Some(1));
        drop(b);
        assert_eq!(reclaimer.outstanding(5), Some(0));

        reclaimer.retire();
        assert_eq!(reclaimer.outstanding(5), None);
    }

    #[test]
    fn test_guard_released_on_other_thread() {
        let reclaimer = EpochReclaimer::new();
        let object = Arc::new(());
        let weak = Arc::downgrade(&object);

        let guard = reclaimer.check_in(0);
        reclaimer.defer(0, object);

        let handle = thread::spawn(move || drop(guard));
        handle.join().unwrap();

        assert_eq!(reclaimer.retire().destroyed, 1);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    #[should_panic(expected = "no outstanding check-in")]
    fn test_unbalanced_checkout_panics() {
        let counts = TurnCounts::default();
        counts.check_out(9);
    }
}
