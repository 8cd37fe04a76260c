//! Tile-based pathfinding using the A* algorithm.
//!
//! Searches run over the grid's 4-neighbour links with unit step cost and a
//! Manhattan heuristic, filtered by the passability class the mover
//! requires. Ties in the open set are broken by insertion order, so the
//! first-found of several equal-cost paths wins and results are
//! deterministic.
//!
//! Walkable requests consult the reachability index first when it is
//! enabled and return an empty path without searching if the endpoints are
//! in different regions.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::grid::Grid;
use crate::tile::{Passability, TileCoord, TileIdx};

/// A node of one search, stored in a per-call arena.
#[derive(Debug, Clone, Copy)]
struct SearchNode {
    tile: TileIdx,
    /// Arena index of the node this one was reached from.
    parent: Option<u32>,
    g: u32,
    h: u32,
}

impl SearchNode {
    const fn f(&self) -> u32 {
        self.g + self.h
    }
}

/// An entry in the A* open set priority queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenEntry {
    f: u32,
    /// Insertion sequence; earlier entries win ties.
    seq: u64,
    node: u32,
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse both keys for min-heap behaviour.
        other
            .f
            .cmp(&self.f)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn require_mobile(class: Passability) {
    assert!(
        class != Passability::Impassable,
        "path requested for the impassable movement class; agent classes must be walkable or flyable"
    );
}

fn compatible(grid: &Grid, coord: TileCoord, class: Passability) -> Option<TileIdx> {
    let idx = grid.idx(coord)?;
    class
        .permits(grid.tile_at(idx).passability())
        .then_some(idx)
}

/// Find a shortest 4-connected path from `start` to `goal` for a mover of
/// `class`.
///
/// The result includes both endpoints. It is empty if either endpoint is
/// missing or incompatible with `class`, or if the goal is unreachable.
///
/// # Panics
///
/// Panics if `class` is [`Passability::Impassable`].
#[must_use]
pub fn find_path(grid: &Grid, start: TileCoord, goal: TileCoord, class: Passability) -> Vec<TileCoord> {
    require_mobile(class);

    let (Some(start_idx), Some(goal_idx)) = (
        compatible(grid, start, class),
        compatible(grid, goal, class),
    ) else {
        return Vec::new();
    };

    if class == Passability::Walkable && grid.same_region(start, goal) == Some(false) {
        trace!(%start, %goal, "Path rejected by reachability index");
        return Vec::new();
    }

    if start_idx == goal_idx {
        return vec![start];
    }

    search(grid, start_idx, goal_idx, goal, class)
}

fn search(
    grid: &Grid,
    start: TileIdx,
    goal: TileIdx,
    goal_coord: TileCoord,
    class: Passability,
) -> Vec<TileCoord> {
    let mut arena: Vec<SearchNode> = Vec::new();
    let mut open: BinaryHeap<OpenEntry> = BinaryHeap::new();
    let mut best_g = vec![u32::MAX; grid.len()];
    let mut closed = vec![false; grid.len()];
    let mut seq = 0u64;

    let root = SearchNode {
        tile: start,
        parent: None,
        g: 0,
        h: grid.tile_at(start).coord().manhattan(goal_coord),
    };
    best_g[start.index()] = 0;
    open.push(OpenEntry {
        f: root.f(),
        seq,
        node: 0,
    });
    arena.push(root);

    while let Some(entry) = open.pop() {
        let current = arena[entry.node as usize];
        if closed[current.tile.index()] {
            continue;
        }
        closed[current.tile.index()] = true;

        if current.tile == goal {
            return reconstruct(grid, &arena, entry.node);
        }

        let g = current.g + 1;
        for &neighbor in grid.tile_at(current.tile).neighbor_slots().iter().flatten() {
            if closed[neighbor.index()] || g >= best_g[neighbor.index()] {
                continue;
            }
            let tile = grid.tile_at(neighbor);
            if !class.permits(tile.passability()) {
                continue;
            }

            best_g[neighbor.index()] = g;
            let h = tile.coord().manhattan(goal_coord);
            let node = SearchNode {
                tile: neighbor,
                parent: Some(entry.node),
                g,
                h,
            };
            seq += 1;
            open.push(OpenEntry {
                f: node.f(),
                seq,
                node: arena.len() as u32,
            });
            arena.push(node);
        }
    }

    Vec::new()
}

fn reconstruct(grid: &Grid, arena: &[SearchNode], last: u32) -> Vec<TileCoord> {
    let mut path = Vec::with_capacity(arena[last as usize].g as usize + 1);
    let mut cursor = Some(last);
    while let Some(node) = cursor {
        let node = arena[node as usize];
        path.push(grid.tile_at(node.tile).coord());
        cursor = node.parent;
    }
    path.reverse();
    path
}

/// Whether a mover of `class` can get from `start` to `goal`.
///
/// Walkable queries are answered by the reachability index when it is
/// enabled; everything else runs a search.
///
/// # Panics
///
/// Panics if `class` is [`Passability::Impassable`].
#[must_use]
pub fn path_exists(grid: &Grid, start: TileCoord, goal: TileCoord, class: Passability) -> bool {
    require_mobile(class);
    if class == Passability::Walkable {
        if let Some(same) = grid.same_region(start, goal) {
            return same;
        }
    }
    !find_path(grid, start, goal, class).is_empty()
}

/// Cells crossed by a straight line from `a` to `b`, endpoints included.
///
/// Bresenham rasterisation thickened to 4-connectivity: on every diagonal
/// step both orthogonal corner cells are included, so a line never slips
/// between two diagonally touching obstacles.
#[must_use]
pub fn line_of_sight(a: TileCoord, b: TileCoord) -> Vec<TileCoord> {
    let dx = (b.x - a.x).abs();
    let dy = (b.y - a.y).abs();
    let sx = if a.x < b.x { 1 } else { -1 };
    let sy = if a.y < b.y { 1 } else { -1 };
    let mut err = dx - dy;

    let (mut x, mut y) = (a.x, a.y);
    let mut cells = vec![a];

    while x != b.x || y != b.y {
        let e2 = 2 * err;
        let step_x = e2 > -dy;
        let step_y = e2 < dx;

        if step_x && step_y {
            cells.push(TileCoord::new(x + sx, y));
            cells.push(TileCoord::new(x, y + sy));
        }
        if step_x {
            err -= dy;
            x += sx;
        }
        if step_y {
            err += dx;
            y += sy;
        }
        cells.push(TileCoord::new(x, y));
    }

    cells
}

/// True if `cells` is non-empty and every cell exists and admits `class`.
///
/// # Panics
///
/// Panics if `class` is [`Passability::Impassable`].
#[must_use]
pub fn path_is_clear(grid: &Grid, cells: &[TileCoord], class: Passability) -> bool {
    require_mobile(class);
    !cells.is_empty()
        && cells
            .iter()
            .all(|&coord| compatible(grid, coord, class).is_some())
}

/// Drop intermediate waypoints that a straight, clear line can skip.
///
/// Greedy: from the current anchor, keep extending to later waypoints while
/// the line to them is clear and stop at the first blocked one; the furthest
/// clear waypoint becomes the next anchor. Endpoints are preserved.
#[must_use]
pub fn cut_corners(grid: &Grid, path: &[TileCoord], class: Passability) -> Vec<TileCoord> {
    if path.len() <= 2 {
        return path.to_vec();
    }

    let mut cut = Vec::with_capacity(path.len());
    cut.push(path[0]);

    let mut anchor = 0;
    while anchor < path.len() - 1 {
        let mut furthest = anchor + 1;
        for candidate in (anchor + 2)..path.len() {
            if path_is_clear(grid, &line_of_sight(path[anchor], path[candidate]), class) {
                furthest = candidate;
            } else {
                break;
            }
        }
        cut.push(path[furthest]);
        anchor = furthest;
    }

    cut
}

/// Counters of path queries made during a turn.
#[derive(Debug, Default)]
pub struct PathStats {
    paths: AtomicU64,
    existence_checks: AtomicU64,
}

/// Values read out of [`PathStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathCounts {
    /// `find_path` calls.
    pub paths: u64,
    /// `path_exists` calls.
    pub existence_checks: u64,
}

impl PathStats {
    /// Record one path search.
    pub fn record_path(&self) {
        self.paths.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record one existence check.
    pub fn record_existence_check(&self) {
        self.existence_checks.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Read and reset the counters.
    pub fn take(&self) -> PathCounts {
        PathCounts {
            paths: self.paths.swap(0, AtomicOrdering::Relaxed),
            existence_checks: self.existence_checks.swap(0, AtomicOrdering::Relaxed),
        }
    }
}
