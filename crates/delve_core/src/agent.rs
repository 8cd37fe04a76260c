//! Mobile agents and the agent registry.
//!
//! Agents are owned by the [`AgentRegistry`] and addressed through
//! generation-checked [`AgentId`] handles. Removing an agent bumps its
//! slot's generation, so stale handles held by tiles or behaviours resolve
//! to `None` instead of aliasing a newer agent in the same slot.
//!
//! Each live agent is an `Arc<Mutex<Agent>>`. Removal hands the `Arc` to the
//! caller (the scheduler moves it into the deferred deletion queue), so a
//! worker that cloned the handle earlier in the turn keeps a valid object.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::catalog::{AgentClass, AgentStats};
use crate::error::{Result, SimError};
use crate::faction::FactionId;
use crate::math::{Fixed, Vec2Fixed};
use crate::tile::{Passability, TileCoord};

/// Shared, lockable agent as stored in the registry.
pub type SharedAgent = Arc<Mutex<Agent>>;

/// Generation-checked handle to an agent slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId {
    index: u32,
    generation: u32,
}

impl AgentId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Slot generation this handle was issued for.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent#{}v{}", self.index, self.generation)
    }
}

/// A creature on the map.
#[derive(Debug, Clone)]
pub struct Agent {
    id: AgentId,
    class: String,
    faction: Option<FactionId>,
    stats: AgentStats,
    movement: Passability,
    position: Vec2Fixed,
    tile: TileCoord,
    waypoints: VecDeque<TileCoord>,
    health: Fixed,
    alive: bool,
    move_budget: Fixed,
}

impl Agent {
    /// Create an agent of `class` standing on `tile`, at full health.
    #[must_use]
    pub fn new(id: AgentId, class: &AgentClass, tile: TileCoord, faction: Option<FactionId>) -> Self {
        Self {
            id,
            class: class.name.clone(),
            faction,
            stats: class.stats(),
            movement: class.movement,
            position: Vec2Fixed::from_tile(tile.x, tile.y),
            tile,
            waypoints: VecDeque::new(),
            health: class.health,
            alive: true,
            move_budget: Fixed::ZERO,
        }
    }

    /// Handle of this agent.
    #[must_use]
    pub const fn id(&self) -> AgentId {
        self.id
    }

    /// Name of the class this agent was created from.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Controlling faction.
    #[must_use]
    pub const fn faction(&self) -> Option<FactionId> {
        self.faction
    }

    /// Stats copied from the class at creation.
    #[must_use]
    pub const fn stats(&self) -> &AgentStats {
        &self.stats
    }

    /// Passability class this agent requires.
    #[must_use]
    pub const fn movement(&self) -> Passability {
        self.movement
    }

    /// Continuous position.
    #[must_use]
    pub const fn position(&self) -> Vec2Fixed {
        self.position
    }

    /// Tile the agent currently occupies.
    #[must_use]
    pub const fn tile(&self) -> TileCoord {
        self.tile
    }

    /// Current health.
    #[must_use]
    pub const fn health(&self) -> Fixed {
        self.health
    }

    /// True until the agent is killed or its health drops to zero.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive && self.health > Fixed::ZERO
    }

    /// Pending waypoints, front first.
    pub fn waypoints(&self) -> impl Iterator<Item = &TileCoord> {
        self.waypoints.iter()
    }

    /// True if the agent has somewhere to go.
    #[must_use]
    pub fn has_waypoints(&self) -> bool {
        !self.waypoints.is_empty()
    }

    /// Append a waypoint.
    pub fn push_waypoint(&mut self, coord: TileCoord) {
        self.waypoints.push_back(coord);
    }

    /// Replace the waypoint queue with a path. A leading waypoint equal to
    /// the current tile is dropped.
    pub fn set_path(&mut self, path: impl IntoIterator<Item = TileCoord>) {
        self.waypoints.clear();
        self.waypoints.extend(path);
        if self.waypoints.front() == Some(&self.tile) {
            self.waypoints.pop_front();
        }
    }

    /// Drop all waypoints.
    pub fn clear_waypoints(&mut self) {
        self.waypoints.clear();
        self.move_budget = Fixed::ZERO;
    }

    /// Subtract health.
    pub fn damage(&mut self, amount: Fixed) {
        self.health -= amount;
    }

    /// Add health, capped at the class maximum.
    pub fn heal(&mut self, amount: Fixed) {
        self.health = (self.health + amount).min(self.stats.max_health);
    }

    /// Mark the agent dead. Its turn call is not interrupted; the scheduler
    /// reaps it after upkeep.
    pub fn kill(&mut self) {
        self.alive = false;
    }

    /// Movement budget carried into the next turn.
    #[must_use]
    pub const fn move_budget(&self) -> Fixed {
        self.move_budget
    }

    pub(crate) fn set_health(&mut self, health: Fixed) {
        self.health = health;
    }

    pub(crate) fn set_move_budget(&mut self, budget: Fixed) {
        self.move_budget = budget;
    }

    /// Consume waypoints according to speed.
    ///
    /// Each turn adds `speed` to the movement budget and every whole unit of
    /// budget consumes one waypoint. A waypoint that `can_enter` rejects
    /// invalidates the rest of the route. Returns `(from, to)` if the agent
    /// changed tile.
    pub(crate) fn advance(
        &mut self,
        mut can_enter: impl FnMut(TileCoord) -> bool,
    ) -> Option<(TileCoord, TileCoord)> {
        let start = self.tile;
        self.move_budget += self.stats.speed;

        while self.move_budget >= Fixed::ONE {
            let Some(&next) = self.waypoints.front() else {
                break;
            };
            if !can_enter(next) {
                self.waypoints.clear();
                break;
            }
            self.waypoints.pop_front();
            self.tile = next;
            self.position = Vec2Fixed::from_tile(next.x, next.y);
            self.move_budget -= Fixed::ONE;
        }

        if self.waypoints.is_empty() {
            self.move_budget = Fixed::ZERO;
        }

        (self.tile != start).then_some((start, self.tile))
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    agent: Option<SharedAgent>,
}

/// Owner of every live agent.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: Vec<AgentId>,
}

impl AgentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a handle and store the agent built for it.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::CapacityExceeded`] once every `u32` slot index is
    /// in use.
    pub fn insert(&mut self, build: impl FnOnce(AgentId) -> Agent) -> Result<AgentId> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len())
                    .map_err(|_| SimError::CapacityExceeded("agent registry"))?;
                self.slots.push(Slot::default());
                index
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = AgentId::new(index, slot.generation);
        slot.agent = Some(Arc::new(Mutex::new(build(id))));
        self.live.push(id);
        Ok(id)
    }

    /// Take an agent out of the registry, invalidating its handle.
    pub fn remove(&mut self, id: AgentId) -> Option<SharedAgent> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let agent = slot.agent.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live.retain(|&live| live != id);
        Some(agent)
    }

    /// Shared handle to a live agent.
    #[must_use]
    pub fn get(&self, id: AgentId) -> Option<&SharedAgent> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.agent.as_ref()
    }

    /// True if `id` refers to a live agent.
    #[must_use]
    pub fn contains(&self, id: AgentId) -> bool {
        self.get(id).is_some()
    }

    /// Live handles in insertion order.
    #[must_use]
    pub fn ids(&self) -> &[AgentId] {
        &self.live
    }

    /// Clones of every live agent handle, in insertion order.
    #[must_use]
    pub fn handles(&self) -> Vec<(AgentId, SharedAgent)> {
        self.live
            .iter()
            .filter_map(|&id| self.get(id).map(|agent| (id, Arc::clone(agent))))
            .collect()
    }

    /// Number of live agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// True if no agents are alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
