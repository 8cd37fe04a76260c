//! Flat map records for loading, saving and peer synchronisation.
//!
//! A [`MapSnapshot`] holds everything needed to rebuild a world: tiles,
//! agents, structures and faction aggregates, plus the turn counter.
//! Records are plain data; neighbour links, reachability colours and
//! occupancy are rebuilt on load.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::faction::{FactionId, FactionStats};
use crate::math::{fixed_serde, Fixed};
use crate::structure::Structure;
use crate::tile::{TileCoord, TileType};

/// One tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRecord {
    /// Coordinate.
    pub coord: TileCoord,
    /// Terrain type.
    pub kind: TileType,
    /// Fullness.
    #[serde(with = "fixed_serde")]
    pub fullness: Fixed,
    /// Owner.
    #[serde(default)]
    pub owner: Option<FactionId>,
    /// Claim progress toward the owner.
    #[serde(default, with = "fixed_serde")]
    pub claim_progress: Fixed,
}

/// One agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Class name in the catalog.
    pub class: String,
    /// Tile the agent stands on.
    pub tile: TileCoord,
    /// Controlling faction.
    #[serde(default)]
    pub faction: Option<FactionId>,
    /// Current health; `None` means full health.
    #[serde(default)]
    pub health: Option<i64>,
    /// Pending waypoints.
    #[serde(default)]
    pub waypoints: Vec<TileCoord>,
    /// Movement budget carried into the next turn.
    #[serde(default, with = "fixed_serde")]
    pub move_budget: Fixed,
}

impl AgentRecord {
    /// Current health, if recorded.
    #[must_use]
    pub fn health(&self) -> Option<Fixed> {
        self.health.map(Fixed::from_bits)
    }
}

/// One faction's aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactionRecord {
    /// Faction.
    pub id: FactionId,
    /// Aggregates as of the snapshot turn.
    pub stats: FactionStats,
}

/// Complete world state at the start of a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapSnapshot {
    /// Turn the state belongs to.
    #[serde(default)]
    pub turn: u64,
    /// Tiles in coordinate order.
    pub tiles: Vec<TileRecord>,
    /// Agents in registry order.
    #[serde(default)]
    pub agents: Vec<AgentRecord>,
    /// Structures.
    #[serde(default)]
    pub structures: Vec<Structure>,
    /// Faction aggregates, ordered by id.
    #[serde(default)]
    pub factions: Vec<FactionRecord>,
}

impl MapSnapshot {
    /// Parse from RON text.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::DataParseError`] if the text is malformed.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        ron::from_str(text).map_err(|e| SimError::DataParseError {
            what: "map",
            message: e.to_string(),
        })
    }

    /// Render as pretty RON text.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Serialization`] if encoding fails.
    pub fn to_ron(&self) -> Result<String> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| SimError::Serialization(format!("Failed to encode map as RON: {e}")))
    }

    /// Encode with bincode.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| SimError::Serialization(format!("Failed to serialize map: {e}")))
    }

    /// Decode from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Serialization`] if decoding fails.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| SimError::Serialization(format!("Failed to deserialize map: {e}")))
    }

    /// Hash of the full state.
    ///
    /// Equal snapshots hash equally within one build; used to compare runs
    /// and to check a peer against its host.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}
