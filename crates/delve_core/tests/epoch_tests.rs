//! Deferred destruction across threads and turns.

use std::sync::{Arc, Weak};
use std::thread;

use delve_core::epoch::{EpochGuard, EpochReclaimer};
use delve_test_utils::proptest::prelude::*;

#[test]
fn test_reader_thread_delays_destruction() {
    let reclaimer: EpochReclaimer<Arc<String>> = EpochReclaimer::new();
    let agent = Arc::new("imp".to_string());
    let weak = Arc::downgrade(&agent);

    let guard = reclaimer.check_in(7);
    reclaimer.defer(7, agent);

    let reader = thread::spawn(move || {
        // The reader still sees the object while it holds turn 7.
        assert!(weak.upgrade().is_some());
        drop(guard);
        weak
    });
    let weak = reader.join().unwrap();

    let report = reclaimer.retire();
    assert_eq!(report.retired, vec![7]);
    assert_eq!(report.destroyed, 1);
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_many_workers_check_out_in_any_order() {
    let reclaimer: EpochReclaimer<Arc<u32>> = EpochReclaimer::new();
    let object = Arc::new(1);
    let weak = Arc::downgrade(&object);
    reclaimer.defer(3, object);

    let guards: Vec<EpochGuard> = (0..8).map(|_| reclaimer.check_in(3)).collect();
    assert_eq!(reclaimer.outstanding(3), Some(8));

    thread::scope(|s| {
        for guard in guards {
            s.spawn(move || drop(guard));
        }
    });

    assert_eq!(reclaimer.outstanding(3), Some(0));
    assert_eq!(reclaimer.retire().destroyed, 1);
    assert!(weak.upgrade().is_none());
    assert_eq!(reclaimer.outstanding(3), None);
}

/// One step of a random check-in/check-out/defer/retire sequence.
#[derive(Debug, Clone)]
enum Op {
    CheckIn(u64),
    CheckOut(usize),
    Defer(u64),
    Retire,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u64..5).prop_map(Op::CheckIn),
        3 => any::<usize>().prop_map(Op::CheckOut),
        2 => (0u64..5).prop_map(Op::Defer),
        2 => Just(Op::Retire),
    ]
}

proptest! {
    /// Nothing is destroyed while its turn, or any older tracked turn, is
    /// held; once every guard is gone, everything is destroyed.
    #[test]
    fn prop_no_destruction_while_held(ops in prop::collection::vec(arb_op(), 1..60)) {
        let reclaimer: EpochReclaimer<Arc<u64>> = EpochReclaimer::new();
        let mut guards: Vec<EpochGuard> = Vec::new();
        let mut deferred: Vec<(u64, Weak<u64>)> = Vec::new();

        for op in ops {
            match op {
                Op::CheckIn(turn) => guards.push(reclaimer.check_in(turn)),
                Op::CheckOut(pick) => {
                    if !guards.is_empty() {
                        let index = pick % guards.len();
                        drop(guards.swap_remove(index));
                    }
                }
                Op::Defer(turn) => {
                    let object = Arc::new(turn);
                    deferred.push((turn, Arc::downgrade(&object)));
                    reclaimer.defer(turn, object);
                }
                Op::Retire => {
                    reclaimer.retire();
                }
            }

            for (turn, weak) in &deferred {
                if guards.iter().any(|g| g.turn() == *turn) {
                    prop_assert!(weak.upgrade().is_some(), "turn {} destroyed while held", turn);
                }
            }
        }

        drop(guards);
        let report = reclaimer.retire();
        prop_assert_eq!(report.pending, 0);
        prop_assert!(deferred.iter().all(|(_, weak)| weak.upgrade().is_none()));
    }
}
