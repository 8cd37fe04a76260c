//! Reference search used to check the path finder.
//!
//! Plain breadth-first search over 4-connected neighbours. Slow but
//! obviously correct, so property tests compare A* results against it.

use std::collections::{HashMap, VecDeque};

use delve_core::grid::Grid;
use delve_core::tile::{Passability, TileCoord};

/// Length in steps of a shortest path for `class`, or `None` if the goal
/// cannot be reached or either endpoint is missing or incompatible.
#[must_use]
pub fn bfs_distance(grid: &Grid, start: TileCoord, goal: TileCoord, class: Passability) -> Option<usize> {
    let enterable = |coord: TileCoord| {
        grid.tile(coord)
            .is_some_and(|tile| class.permits(tile.passability()))
    };
    if !enterable(start) || !enterable(goal) {
        return None;
    }

    let mut dist = HashMap::from([(start, 0usize)]);
    let mut frontier = VecDeque::from([start]);
    while let Some(current) = frontier.pop_front() {
        let d = dist[&current];
        if current == goal {
            return Some(d);
        }
        for next in grid.neighbors(current) {
            if enterable(next) && !dist.contains_key(&next) {
                dist.insert(next, d + 1);
                frontier.push_back(next);
            }
        }
    }
    None
}

/// Every tile a walker can reach from `start`, including `start`.
#[must_use]
pub fn walkable_component(grid: &Grid, start: TileCoord) -> Vec<TileCoord> {
    let walkable = |coord: TileCoord| {
        grid.tile(coord)
            .is_some_and(|tile| tile.passability() == Passability::Walkable)
    };
    if !walkable(start) {
        return Vec::new();
    }
    let mut seen = vec![start];
    let mut frontier = VecDeque::from([start]);
    while let Some(current) = frontier.pop_front() {
        for next in grid.neighbors(current) {
            if walkable(next) && !seen.contains(&next) {
                seen.push(next);
                frontier.push_back(next);
            }
        }
    }
    seen
}

/// Whether `path` is a valid walk for `class` from `start` to `goal`.
#[must_use]
pub fn is_valid_walk(grid: &Grid, path: &[TileCoord], start: TileCoord, goal: TileCoord, class: Passability) -> bool {
    if path.first() != Some(&start) || path.last() != Some(&goal) {
        return false;
    }
    let compatible = path.iter().all(|&coord| {
        grid.tile(coord)
            .is_some_and(|tile| class.permits(tile.passability()))
    });
    compatible && path.windows(2).all(|w| w[0].is_adjacent(w[1]))
}
