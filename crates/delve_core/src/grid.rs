//! The tile map.
//!
//! Tiles live in a contiguous arena and are never removed or relocated, so
//! a [`TileIdx`] stays valid for the lifetime of the grid. A `BTreeMap`
//! from coordinate to index provides O(log N) lookup and a deterministic
//! iteration order. Neighbour links are arena indices wired at insertion.
//!
//! All mutators that can change a tile's passability go through the grid so
//! the reachability index is kept consistent.

use std::collections::{BTreeMap, HashSet};

use crate::agent::AgentId;
use crate::error::{Result, SimError};
use crate::faction::FactionId;
use crate::math::Fixed;
use crate::pathfinding::line_of_sight;
use crate::reachability::ReachabilityIndex;
use crate::tile::{Direction, Tile, TileCoord, TileIdx, TileType};

/// Owner of every tile on the map.
#[derive(Debug, Clone, Default)]
pub struct Grid {
    tiles: Vec<Tile>,
    index: BTreeMap<TileCoord, TileIdx>,
    reachability: ReachabilityIndex,
}

impl Grid {
    /// Create an empty grid.
    #[must_use]
    pub fn new(reachability_enabled: bool) -> Self {
        Self {
            tiles: Vec::new(),
            index: BTreeMap::new(),
            reachability: ReachabilityIndex::new(reachability_enabled),
        }
    }

    /// Insert a tile and link it to its already-present orthogonal neighbours.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::DuplicateTile`] if the coordinate is taken.
    pub fn insert_tile(&mut self, mut tile: Tile) -> Result<TileIdx> {
        let coord = tile.coord();
        if self.index.contains_key(&coord) {
            return Err(SimError::DuplicateTile(coord));
        }

        let idx = TileIdx(
            u32::try_from(self.tiles.len()).map_err(|_| SimError::CapacityExceeded("tile arena"))?,
        );

        tile.neighbors = [None; 4];
        for dir in Direction::ALL {
            if let Some(&neighbor) = self.index.get(&coord.step(dir)) {
                tile.neighbors[dir.slot()] = Some(neighbor);
                self.tiles[neighbor.index()].neighbors[dir.opposite().slot()] = Some(idx);
            }
        }

        self.tiles.push(tile);
        self.index.insert(coord, idx);

        #[cfg(feature = "debug-validation")]
        self.validate_links(idx);

        self.reachability.invalidate(&mut self.tiles);
        Ok(idx)
    }

    #[cfg(feature = "debug-validation")]
    fn validate_links(&self, idx: TileIdx) {
        let tile = &self.tiles[idx.index()];
        for dir in Direction::ALL {
            if let Some(neighbor) = tile.neighbors[dir.slot()] {
                let back = self.tiles[neighbor.index()].neighbors[dir.opposite().slot()];
                assert_eq!(back, Some(idx), "asymmetric neighbour link at {}", tile.coord());
            }
        }
    }

    /// Number of tiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// True if the grid has no tiles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Arena index of the tile at `coord`.
    #[must_use]
    pub fn idx(&self, coord: TileCoord) -> Option<TileIdx> {
        self.index.get(&coord).copied()
    }

    /// Tile at `coord`.
    #[must_use]
    pub fn tile(&self, coord: TileCoord) -> Option<&Tile> {
        self.idx(coord).map(|idx| &self.tiles[idx.index()])
    }

    /// Tile at an arena index obtained from this grid.
    ///
    /// # Panics
    ///
    /// Panics if `idx` did not come from this grid.
    #[must_use]
    pub fn tile_at(&self, idx: TileIdx) -> &Tile {
        &self.tiles[idx.index()]
    }

    /// Iterate tiles in coordinate order.
    pub fn iter(&self) -> impl Iterator<Item = &Tile> {
        self.index.values().map(move |idx| &self.tiles[idx.index()])
    }

    /// Coordinates of the (up to 4) neighbours of `coord`.
    #[must_use]
    pub fn neighbors(&self, coord: TileCoord) -> Vec<TileCoord> {
        self.tile(coord)
            .map(|tile| {
                tile.neighbors
                    .iter()
                    .flatten()
                    .map(|idx| self.tiles[idx.index()].coord())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tiles inside the rectangle spanned by two corners (inclusive, any order).
    #[must_use]
    pub fn rectangular_region(&self, a: TileCoord, b: TileCoord) -> Vec<TileCoord> {
        let (x1, x2) = (a.x.min(b.x), a.x.max(b.x));
        let (y1, y2) = (a.y.min(b.y), a.y.max(b.y));

        let mut region = Vec::new();
        for x in x1..=x2 {
            for y in y1..=y2 {
                let coord = TileCoord::new(x, y);
                if self.index.contains_key(&coord) {
                    region.push(coord);
                }
            }
        }
        region
    }

    /// Tiles strictly within `radius` of `center`. Negative radii are treated as zero.
    #[must_use]
    pub fn circular_region(&self, center: TileCoord, radius: Fixed) -> Vec<TileCoord> {
        let radius = radius.max(Fixed::ZERO);
        let radius_sq = radius * radius;
        let reach = radius.ceil().to_num::<i32>();

        let mut region = Vec::new();
        for x in (center.x - reach)..=(center.x + reach) {
            for y in (center.y - reach)..=(center.y + reach) {
                let dx = Fixed::from_num(x - center.x);
                let dy = Fixed::from_num(y - center.y);
                if dx * dx + dy * dy < radius_sq {
                    let coord = TileCoord::new(x, y);
                    if self.index.contains_key(&coord) {
                        region.push(coord);
                    }
                }
            }
        }
        region
    }

    /// Tiles an observer on `center` can see within `radius`.
    ///
    /// A tile is visible when every cell strictly between it and `center` on
    /// the [`line_of_sight`] exists and permits vision, so the first opaque
    /// tile in a direction is seen but nothing behind it. An observer inside
    /// an opaque tile sees nothing. Results follow [`Grid::circular_region`]
    /// order.
    #[must_use]
    pub fn visible_tiles(&self, center: TileCoord, radius: Fixed) -> Vec<TileCoord> {
        if !self.tile(center).is_some_and(Tile::permits_vision) {
            return Vec::new();
        }
        self.circular_region(center, radius)
            .into_iter()
            .filter(|&target| {
                let cells = line_of_sight(center, target);
                cells.len() <= 2
                    || cells[1..cells.len() - 1]
                        .iter()
                        .all(|&cell| self.tile(cell).is_some_and(Tile::permits_vision))
            })
            .collect()
    }

    /// Tiles adjacent to `region` but not part of it, without duplicates.
    ///
    /// Results are in first-seen order while walking `region` in order.
    #[must_use]
    pub fn tiles_bordering(&self, region: &[TileCoord]) -> Vec<TileCoord> {
        let inside: HashSet<TileCoord> = region.iter().copied().collect();
        let mut seen = HashSet::new();
        let mut border = Vec::new();

        for &coord in region {
            for neighbor in self.neighbors(coord) {
                if !inside.contains(&neighbor) && seen.insert(neighbor) {
                    border.push(neighbor);
                }
            }
        }
        border
    }

    /// Set a tile's fullness.
    ///
    /// Returns `Some(true)` if the passability class changed, `None` if there
    /// is no tile at `coord`.
    pub fn set_fullness(&mut self, coord: TileCoord, fullness: Fixed) -> Option<bool> {
        let idx = self.idx(coord)?;
        Some(self.edit_tile(idx, |tile| tile.set_fullness(fullness)))
    }

    /// Remove up to `amount` fullness from a tile. Returns the remaining fullness.
    pub fn dig(&mut self, coord: TileCoord, amount: Fixed) -> Option<Fixed> {
        let current = self.tile(coord)?.fullness();
        let remaining = (current - amount).max(Fixed::ZERO);
        self.set_fullness(coord, remaining)?;
        Some(remaining)
    }

    /// Set a tile's type. Returns `Some(true)` if the passability class changed.
    pub fn set_type(&mut self, coord: TileCoord, kind: TileType) -> Option<bool> {
        let idx = self.idx(coord)?;
        Some(self.edit_tile(idx, |tile| tile.set_type(kind)))
    }

    /// Push a tile's claim toward `faction`.
    ///
    /// Returns `Some(true)` once the tile has become claimed floor of `faction`.
    pub fn claim_for(&mut self, coord: TileCoord, faction: FactionId, rate: Fixed) -> Option<bool> {
        let idx = self.idx(coord)?;
        self.edit_tile(idx, |tile| tile.claim_for(faction, rate));
        let tile = &self.tiles[idx.index()];
        Some(tile.kind() == TileType::Claimed && tile.owner() == Some(faction))
    }

    /// Apply a tile edit and keep the colouring consistent.
    ///
    /// An edit that keeps the passability class leaves connectivity as it
    /// was, so the tile gets its old colour back. A class change recolours.
    fn edit_tile(&mut self, idx: TileIdx, edit: impl FnOnce(&mut Tile) -> bool) -> bool {
        let tile = &mut self.tiles[idx.index()];
        let color = tile.reach_color;
        let changed = edit(&mut *tile);
        if changed {
            self.reachability.invalidate(&mut self.tiles);
        } else {
            tile.reach_color = color;
        }
        changed
    }

    /// Record that `agent` now stands on `coord`.
    pub fn add_occupant(&mut self, coord: TileCoord, agent: AgentId) -> bool {
        let Some(idx) = self.idx(coord) else {
            return false;
        };
        let occupants = &mut self.tiles[idx.index()].occupants;
        if !occupants.contains(&agent) {
            occupants.push(agent);
        }
        true
    }

    /// Remove `agent` from the occupants of `coord`.
    pub fn remove_occupant(&mut self, coord: TileCoord, agent: AgentId) -> bool {
        let Some(idx) = self.idx(coord) else {
            return false;
        };
        let occupants = &mut self.tiles[idx.index()].occupants;
        match occupants.iter().position(|&id| id == agent) {
            Some(pos) => {
                occupants.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// The connectivity index.
    #[must_use]
    pub fn reachability(&self) -> &ReachabilityIndex {
        &self.reachability
    }

    /// Turn the connectivity index on and recolour the whole map.
    pub fn enable_reachability(&mut self) {
        self.reachability.enable(&mut self.tiles);
    }

    /// Stop maintaining the connectivity index.
    pub fn disable_reachability(&mut self) {
        self.reachability.disable();
    }

    /// Whether two coordinates share a walkable region.
    ///
    /// `None` while the index is disabled; `Some(false)` if either tile is missing.
    #[must_use]
    pub fn same_region(&self, a: TileCoord, b: TileCoord) -> Option<bool> {
        if !self.reachability.is_enabled() {
            return None;
        }
        match (self.tile(a), self.tile(b)) {
            (Some(a), Some(b)) => self.reachability.same_region(a, b),
            _ => Some(false),
        }
    }
}
