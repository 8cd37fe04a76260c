//! Faction identifiers and per-faction aggregates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a faction (a player seat).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactionId(pub u32);

impl fmt::Display for FactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "faction#{}", self.0)
    }
}

/// Aggregates recomputed for each faction during upkeep.
///
/// Everything except `mana` is recounted from scratch every turn; mana
/// accumulates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactionStats {
    /// Claimed tiles owned by the faction.
    pub claimed_tiles: u32,
    /// Gold held in the faction's treasuries.
    pub gold: u64,
    /// Accumulated mana, capped by configuration.
    pub mana: u64,
    /// Living agents controlled by the faction.
    pub agents: u32,
}

impl FactionStats {
    /// Mana gained this turn for the current claimed tile count.
    #[must_use]
    pub const fn mana_income(&self, base_mana: u64) -> u64 {
        base_mana + self.claimed_tiles as u64
    }

    /// Add one turn of mana income, saturating at `cap`.
    pub fn accrue_mana(&mut self, base_mana: u64, cap: u64) {
        self.mana = self.mana.saturating_add(self.mana_income(base_mana)).min(cap);
    }
}
