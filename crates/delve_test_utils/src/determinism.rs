//! Determinism testing utilities.
//!
//! Provides a harness for verifying that the simulation
//! produces identical results given identical inputs.
//!
//! # Testing Strategy
//!
//! Turns run agent behaviours on several worker threads, so anything a
//! behaviour reads from another slice may vary between runs. With a single
//! worker and a deterministic behaviour, every run must end in the same
//! state. Sources of divergence include:
//!
//! - **Floating-point math**: We use fixed-point arithmetic via
//!   [`delve_core::math::Fixed`] throughout.
//!
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   Snapshots, agents and factions are always kept in stable order.
//!
//! - **Worker interleaving**: behaviours that touch shared tiles from
//!   different slices race. Use one worker when comparing hashes.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

use delve_core::scheduler::{AgentBehavior, TurnScheduler};
use delve_core::world::World;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of turns simulated.
    pub turns: u64,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for deterministic simulation).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that the simulation was deterministic, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the simulation produced different hashes across runs.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Simulation is non-deterministic!\n\
                 Runs: {}\n\
                 Turns: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.turns,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run a simulation multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of times to run the simulation
/// * `turns` - Number of turns to simulate per run
/// * `setup` - Function to create initial simulation state
/// * `step` - Function to advance simulation by one turn
/// * `hash` - Function to compute state hash
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    turns: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for _ in 0..turns {
            step(&mut state);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        turns,
    }
}

/// Advance `world` by `turns` turns with a fresh scheduler.
///
/// # Panics
///
/// Panics if a turn fails to run.
pub fn run_turns<B>(world: &mut World, behavior: &B, turns: u64)
where
    B: AgentBehavior + ?Sized,
{
    let mut scheduler = TurnScheduler::new();
    for _ in 0..turns {
        if let Err(err) = scheduler.tick(world, behavior) {
            panic!("turn {} failed: {err}", world.turn());
        }
    }
}

/// Run two worlds from the same setup and verify their final state hashes
/// match.
pub fn verify_world_determinism<F, B>(setup_fn: F, behavior: &B, turns: u64) -> DeterminismResult
where
    F: Fn() -> World,
    B: AgentBehavior + ?Sized,
{
    verify_determinism(
        2,
        turns,
        setup_fn,
        |world| run_turns(world, behavior, 1),
        World::state_hash,
    )
}

/// Run `num_worlds` worlds on separate threads and collect final hashes.
///
/// Catches divergence that only shows up under different thread timing.
pub fn run_parallel_worlds<F, B>(setup_fn: F, behavior: &B, num_worlds: usize, turns: u64) -> Vec<u64>
where
    F: Fn() -> World + Sync,
    B: AgentBehavior + ?Sized,
{
    thread::scope(|s| {
        let handles: Vec<_> = (0..num_worlds)
            .map(|_| {
                s.spawn(|| {
                    let mut world = setup_fn();
                    run_turns(&mut world, behavior, turns);
                    world.state_hash()
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().expect("world thread panicked"))
            .collect()
    })
}

/// Compare two runs turn by turn, finding the first divergence.
///
/// # Returns
///
/// `None` if the runs stay identical, `Some(turn)` for the first turn
/// whose resulting state differs.
pub fn find_first_divergence<F, B>(setup_fn: F, behavior: &B, turns: u64) -> Option<u64>
where
    F: Fn() -> World,
    B: AgentBehavior + ?Sized,
{
    let mut a = setup_fn();
    let mut b = setup_fn();

    if a.state_hash() != b.state_hash() {
        return Some(0);
    }

    let mut first = TurnScheduler::new();
    let mut second = TurnScheduler::new();
    for turn in 1..=turns {
        let ran = first.tick(&mut a, behavior).is_ok() && second.tick(&mut b, behavior).is_ok();
        if !ran || a.state_hash() != b.state_hash() {
            tracing::debug!(turn, "Runs diverged");
            return Some(turn);
        }
    }

    None
}

/// Verify that saving and reloading preserves world state exactly.
pub fn verify_snapshot_determinism<F, B>(setup_fn: F, behavior: &B, turns: u64) -> bool
where
    F: Fn() -> World,
    B: AgentBehavior + ?Sized,
{
    let mut world = setup_fn();
    run_turns(&mut world, behavior, turns);

    let snapshot = world.snapshot();
    let Ok(bytes) = snapshot.to_bytes() else {
        return false;
    };
    let Ok(decoded) = delve_core::snapshot::MapSnapshot::from_bytes(&bytes) else {
        return false;
    };
    let Ok(restored) = World::from_snapshot(&decoded, world.config().clone(), world.catalog().clone()) else {
        return false;
    };

    restored.state_hash() == world.state_hash()
}

/// Compute a simple hash for any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for grid and path testing.
pub mod strategies {
    use proptest::prelude::*;

    use delve_core::grid::Grid;
    use delve_core::math::Fixed;
    use delve_core::tile::{Tile, TileCoord, TileType, MAX_FULLNESS};

    /// A random tile type weighted toward open floor.
    pub fn arb_tile_type() -> impl Strategy<Value = TileType> {
        prop_oneof![
            6 => Just(TileType::Bare),
            1 => Just(TileType::Rock),
            1 => Just(TileType::Lava),
            1 => Just(TileType::Resource),
        ]
    }

    /// A fullness that is either dug out or solid.
    pub fn arb_fullness() -> impl Strategy<Value = Fixed> {
        prop_oneof![3 => Just(Fixed::ZERO), 1 => Just(MAX_FULLNESS)]
    }

    /// A rectangular map up to `max_side` tiles on each side.
    ///
    /// The index state is left to the caller.
    pub fn arb_grid(max_side: i32) -> impl Strategy<Value = Grid> {
        (2..=max_side, 2..=max_side).prop_flat_map(|(w, h)| {
            let cells = usize::try_from(w * h).unwrap_or(0);
            prop::collection::vec((arb_tile_type(), arb_fullness()), cells).prop_map(move |cells| {
                let mut grid = Grid::new(false);
                for (i, (kind, fullness)) in cells.into_iter().enumerate() {
                    let i = i32::try_from(i).unwrap_or(0);
                    let coord = TileCoord::new(i % w, i / w);
                    let fullness = if kind == TileType::Rock { MAX_FULLNESS } else { fullness };
                    grid.insert_tile(Tile::new(coord, kind, fullness))
                        .expect("fresh coordinates");
                }
                grid
            })
        })
    }

    /// A coordinate within `[0, side)` on both axes.
    pub fn arb_coord(side: i32) -> impl Strategy<Value = TileCoord> {
        (0..side, 0..side).prop_map(|(x, y)| TileCoord::new(x, y))
    }
}
