//! Flood-fill connectivity colouring over the grid.
//!
//! Every walkable tile receives a colour shared with all walkable tiles it
//! can reach through 4-connected walkable steps. Two tiles are mutually
//! reachable by a walker iff both are walkable and their colours match, so
//! the path finder can reject impossible walkable queries in O(1).
//!
//! The index is recomputed in full whenever a tile's passability class
//! changes. It can be disabled during bulk edits (level loading, scripted
//! terrain changes) to avoid a recolour per edit; while disabled it answers
//! no queries and the path finder always runs a full search.
//!
//! Fliers are not covered: flyable reachability always needs a search.

use tracing::trace;

use crate::tile::{Passability, Tile};

/// Connectivity colouring state.
#[derive(Debug, Clone)]
pub struct ReachabilityIndex {
    enabled: bool,
    regions: u32,
    passes: u64,
}

impl Default for ReachabilityIndex {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ReachabilityIndex {
    /// Create an index. Tiles are coloured on the first recolour pass.
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled,
            regions: 0,
            passes: 0,
        }
    }

    /// Whether the index is maintained and may be queried.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of distinct walkable regions after the last pass.
    #[must_use]
    pub const fn regions(&self) -> u32 {
        self.regions
    }

    /// Number of full recolour passes run so far.
    #[must_use]
    pub const fn passes(&self) -> u64 {
        self.passes
    }

    /// Whether two tiles are mutually reachable by a walker.
    ///
    /// Returns `None` while the index is disabled.
    #[must_use]
    pub fn same_region(&self, a: &Tile, b: &Tile) -> Option<bool> {
        if !self.enabled {
            return None;
        }
        let walkable = a.passability() == Passability::Walkable
            && b.passability() == Passability::Walkable;
        Some(walkable && a.reach_color().is_some() && a.reach_color() == b.reach_color())
    }

    pub(crate) fn disable(&mut self) {
        self.enabled = false;
    }

    pub(crate) fn enable(&mut self, tiles: &mut [Tile]) {
        self.enabled = true;
        self.recolor(tiles);
    }

    /// Recolour after a passability-affecting edit, if enabled.
    pub(crate) fn invalidate(&mut self, tiles: &mut [Tile]) {
        if self.enabled {
            self.recolor(tiles);
        }
    }

    /// Full recolour pass with an explicit worklist.
    pub(crate) fn recolor(&mut self, tiles: &mut [Tile]) {
        for tile in tiles.iter_mut() {
            tile.reach_color = None;
        }

        let mut next_color = 0u32;
        let mut stack = Vec::new();
        for seed in 0..tiles.len() {
            if tiles[seed].reach_color.is_some()
                || tiles[seed].passability() != Passability::Walkable
            {
                continue;
            }

            let color = next_color;
            next_color += 1;
            tiles[seed].reach_color = Some(color);
            stack.push(seed);

            while let Some(current) = stack.pop() {
                let neighbors = tiles[current].neighbors;
                for neighbor in neighbors.into_iter().flatten() {
                    let tile = &mut tiles[neighbor.index()];
                    if tile.reach_color.is_none() && tile.passability() == Passability::Walkable {
                        tile.reach_color = Some(color);
                        stack.push(neighbor.index());
                    }
                }
            }
        }

        self.regions = next_color;
        self.passes += 1;
        trace!(regions = next_color, pass = self.passes, "Reachability recoloured");
    }
}
