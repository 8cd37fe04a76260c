//! Faction structures built on claimed floor.
//!
//! A structure covers a set of tiles. Upkeep drops covered tiles that are no
//! longer claimed floor of the structure's owner, and removes structures
//! left with no tiles.

use serde::{Deserialize, Serialize};

use crate::faction::FactionId;
use crate::grid::Grid;
use crate::math::{fixed_serde, Fixed};
use crate::tile::{TileCoord, TileType};

/// What a structure does during upkeep.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructureKind {
    /// Stores gold. Faction gold is the sum over its treasuries.
    Treasury {
        /// Gold stored.
        gold: u64,
    },
    /// Heals the owner's agents standing on it.
    Quarters {
        /// Health restored per turn.
        #[serde(with = "fixed_serde")]
        heal_per_turn: Fixed,
    },
    /// Spawns agents of one class at a fixed interval.
    Portal {
        /// Class to spawn.
        class: String,
        /// Turns between spawns.
        interval: u64,
        /// No spawn while the owner controls this many agents.
        max_agents: u32,
    },
}

/// A structure on the map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Structure {
    /// Behaviour.
    pub kind: StructureKind,
    /// Owning faction.
    pub owner: FactionId,
    tiles: Vec<TileCoord>,
}

impl Structure {
    /// Create a structure covering `tiles`.
    #[must_use]
    pub fn new(kind: StructureKind, owner: FactionId, tiles: Vec<TileCoord>) -> Self {
        Self { kind, owner, tiles }
    }

    /// Covered tiles.
    #[must_use]
    pub fn tiles(&self) -> &[TileCoord] {
        &self.tiles
    }

    /// True if `coord` is covered.
    #[must_use]
    pub fn covers(&self, coord: TileCoord) -> bool {
        self.tiles.contains(&coord)
    }

    /// True once every covered tile has been lost.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Gold stored, zero for anything but a treasury.
    #[must_use]
    pub fn gold(&self) -> u64 {
        match &self.kind {
            StructureKind::Treasury { gold } => *gold,
            _ => 0,
        }
    }

    /// Add gold to a treasury. Returns `false` for other kinds.
    pub fn deposit(&mut self, amount: u64) -> bool {
        match &mut self.kind {
            StructureKind::Treasury { gold } => {
                *gold = gold.saturating_add(amount);
                true
            }
            _ => false,
        }
    }

    /// Drop covered tiles that are not claimed floor of the owner.
    /// Returns how many tiles were dropped.
    pub fn retain_owned(&mut self, grid: &Grid) -> usize {
        let before = self.tiles.len();
        let owner = self.owner;
        self.tiles.retain(|&coord| {
            grid.tile(coord)
                .is_some_and(|t| t.kind() == TileType::Claimed && t.owner() == Some(owner))
        });
        before - self.tiles.len()
    }
}
