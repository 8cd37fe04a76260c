//! The simulation context.
//!
//! [`World`] owns the grid, the agent registry, structures and faction
//! aggregates, each container behind its own lock. Worker threads share the
//! world by reference during a turn; upkeep and level edits take it
//! exclusively and bypass the locks with `get_mut`.
//!
//! Lock discipline: a worker may hold its own agent's mutex and then at
//! most one container lock. Two container locks are never held at once.

use std::collections::BTreeMap;
use std::sync::{Arc, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::agent::{Agent, AgentId, AgentRegistry, SharedAgent};
use crate::catalog::AgentCatalog;
use crate::config::SimConfig;
use crate::epoch::EpochReclaimer;
use crate::error::{Result, SimError};
use crate::faction::{FactionId, FactionStats};
use crate::grid::Grid;
use crate::math::Fixed;
use crate::notify::{PeerNotice, UpdateQueue, VisualUpdate};
use crate::pathfinding::{self, PathStats};
use crate::snapshot::{AgentRecord, FactionRecord, MapSnapshot, TileRecord};
use crate::structure::Structure;
use crate::sync::{PeerBarrier, PeerRole};
use crate::tile::{Passability, Tile, TileCoord};

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn exclusive<T>(lock: &mut RwLock<T>) -> &mut T {
    lock.get_mut().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn lock_agent(agent: &SharedAgent) -> MutexGuard<'_, Agent> {
    agent.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Explicit simulation context.
#[derive(Debug)]
pub struct World {
    pub(crate) config: SimConfig,
    pub(crate) catalog: AgentCatalog,
    turn: u64,
    pub(crate) grid: RwLock<Grid>,
    pub(crate) agents: RwLock<AgentRegistry>,
    pub(crate) structures: RwLock<Vec<Structure>>,
    pub(crate) factions: BTreeMap<FactionId, FactionStats>,
    pub(crate) reclaimer: EpochReclaimer<SharedAgent>,
    barrier: Arc<PeerBarrier>,
    visual: Option<Arc<UpdateQueue<VisualUpdate>>>,
    peers: Option<Arc<UpdateQueue<PeerNotice>>>,
    pub(crate) path_stats: PathStats,
}

impl World {
    /// Create a world with an empty map.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: SimConfig, catalog: AgentCatalog) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            grid: RwLock::new(Grid::new(config.reachability_enabled)),
            config,
            catalog,
            turn: 0,
            agents: RwLock::new(AgentRegistry::new()),
            structures: RwLock::new(Vec::new()),
            factions: BTreeMap::new(),
            reclaimer: EpochReclaimer::new(),
            barrier: Arc::new(PeerBarrier::default()),
            visual: None,
            peers: None,
            path_stats: PathStats::default(),
        })
    }

    /// Build a world from saved records.
    ///
    /// # Errors
    ///
    /// Fails on duplicate tiles, unknown agent classes, agents placed off
    /// the map, or an invalid `config`.
    pub fn from_snapshot(
        snapshot: &MapSnapshot,
        config: SimConfig,
        catalog: AgentCatalog,
    ) -> Result<Self> {
        let mut world = Self::new(config, catalog)?;
        world.load(snapshot)?;
        info!(
            turn = world.turn,
            tiles = snapshot.tiles.len(),
            agents = snapshot.agents.len(),
            "World loaded"
        );
        Ok(world)
    }

    /// Set the session role. Call before the first tick.
    #[must_use]
    pub fn with_role(mut self, role: PeerRole) -> Self {
        self.barrier = Arc::new(PeerBarrier::new(role));
        self
    }

    fn load(&mut self, snapshot: &MapSnapshot) -> Result<()> {
        let mut grid = Grid::new(false);
        for record in &snapshot.tiles {
            let mut tile =
                Tile::new(record.coord, record.kind, record.fullness).with_owner(record.owner);
            tile.restore_claim_progress(record.claim_progress);
            grid.insert_tile(tile)?;
        }
        if self.config.reachability_enabled {
            grid.enable_reachability();
        }

        let mut registry = AgentRegistry::new();
        for record in &snapshot.agents {
            let class = self.catalog.require(&record.class)?;
            if grid.tile(record.tile).is_none() {
                return Err(SimError::MissingTile(record.tile));
            }
            let id = registry.insert(|id| {
                let mut agent = Agent::new(id, class, record.tile, record.faction);
                if let Some(health) = record.health() {
                    agent.set_health(health);
                }
                agent.set_path(record.waypoints.iter().copied());
                agent.set_move_budget(record.move_budget);
                agent
            })?;
            grid.add_occupant(record.tile, id);
        }

        let retired = std::mem::replace(exclusive(&mut self.agents), registry);
        for (_, handle) in retired.handles() {
            self.reclaimer.defer(self.turn, handle);
        }

        *exclusive(&mut self.grid) = grid;
        *exclusive(&mut self.structures) = snapshot.structures.clone();
        self.factions = snapshot
            .factions
            .iter()
            .map(|record| (record.id, record.stats))
            .collect();
        self.turn = snapshot.turn;
        Ok(())
    }

    /// Record the current state.
    #[must_use]
    pub fn snapshot(&self) -> MapSnapshot {
        let tiles = read(&self.grid)
            .iter()
            .map(|tile| TileRecord {
                coord: tile.coord(),
                kind: tile.kind(),
                fullness: tile.fullness(),
                owner: tile.owner(),
                claim_progress: tile.claim_progress(),
            })
            .collect();

        let handles = read(&self.agents).handles();
        let agents = handles
            .iter()
            .map(|(_, handle)| {
                let agent = lock_agent(handle);
                AgentRecord {
                    class: agent.class().to_string(),
                    tile: agent.tile(),
                    faction: agent.faction(),
                    health: Some(agent.health().to_bits()),
                    waypoints: agent.waypoints().copied().collect(),
                    move_budget: agent.move_budget(),
                }
            })
            .collect();

        MapSnapshot {
            turn: self.turn,
            tiles,
            agents,
            structures: read(&self.structures).clone(),
            factions: self
                .factions
                .iter()
                .map(|(&id, &stats)| FactionRecord { id, stats })
                .collect(),
        }
    }

    /// Hash of the current state.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        self.snapshot().state_hash()
    }

    /// Replace the local state with a host's state.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::StaleTurn`] unless the snapshot is newer than the
    /// local turn, or a load error if the records are invalid.
    pub fn apply_authoritative(&mut self, snapshot: &MapSnapshot) -> Result<()> {
        if snapshot.turn <= self.turn {
            return Err(SimError::StaleTurn {
                received: snapshot.turn,
                local: self.turn,
            });
        }
        self.load(snapshot)?;
        self.reclaimer.retire();
        debug!(turn = self.turn, "Applied authoritative state");
        Ok(())
    }

    /// Current turn number.
    #[must_use]
    pub const fn turn(&self) -> u64 {
        self.turn
    }

    pub(crate) fn advance_turn(&mut self) {
        self.turn += 1;
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Agent class catalog.
    #[must_use]
    pub const fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    /// Shared read access to the grid.
    pub fn grid(&self) -> RwLockReadGuard<'_, Grid> {
        read(&self.grid)
    }

    /// Exclusive access to the grid for level edits between turns.
    pub fn grid_mut(&mut self) -> &mut Grid {
        exclusive(&mut self.grid)
    }

    /// Run many grid edits with the reachability index suspended, then
    /// recolour once if it was enabled.
    pub fn bulk_edit<R>(&mut self, edit: impl FnOnce(&mut Grid) -> R) -> R {
        let grid = exclusive(&mut self.grid);
        let was_enabled = grid.reachability().is_enabled();
        grid.disable_reachability();
        let result = edit(grid);
        if was_enabled {
            grid.enable_reachability();
        }
        result
    }

    /// Shared read access to the agent registry.
    pub fn agents(&self) -> RwLockReadGuard<'_, AgentRegistry> {
        read(&self.agents)
    }

    /// Shared handle to one agent.
    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<SharedAgent> {
        read(&self.agents).get(id).map(Arc::clone)
    }

    /// Number of live agents.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        read(&self.agents).len()
    }

    /// Create an agent of a catalog class on `tile`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::UnknownAgentClass`], [`SimError::MissingTile`] or
    /// [`SimError::CapacityExceeded`].
    pub fn spawn_agent(
        &mut self,
        class: &str,
        tile: TileCoord,
        faction: Option<FactionId>,
    ) -> Result<AgentId> {
        let class = self.catalog.require(class)?.clone();
        let grid = exclusive(&mut self.grid);
        if grid.tile(tile).is_none() {
            return Err(SimError::MissingTile(tile));
        }
        let id = exclusive(&mut self.agents).insert(|id| Agent::new(id, &class, tile, faction))?;
        grid.add_occupant(tile, id);
        self.emit_visual(
            self.turn,
            VisualUpdate::AgentSpawned {
                id,
                class: class.name,
                tile,
            },
        );
        Ok(id)
    }

    /// Shared read access to the structures.
    pub fn structures(&self) -> RwLockReadGuard<'_, Vec<Structure>> {
        read(&self.structures)
    }

    /// Add a structure.
    pub fn add_structure(&mut self, structure: Structure) {
        exclusive(&mut self.structures).push(structure);
    }

    /// Aggregates of one faction.
    #[must_use]
    pub fn faction(&self, id: FactionId) -> Option<&FactionStats> {
        self.factions.get(&id)
    }

    /// Aggregates of every known faction, ordered by id.
    #[must_use]
    pub const fn factions(&self) -> &BTreeMap<FactionId, FactionStats> {
        &self.factions
    }

    /// Register a faction with empty aggregates.
    pub fn add_faction(&mut self, id: FactionId) {
        self.factions.entry(id).or_default();
    }

    /// Deferred-deletion state.
    #[must_use]
    pub const fn reclaimer(&self) -> &EpochReclaimer<SharedAgent> {
        &self.reclaimer
    }

    /// Peer barrier, shared with the network layer.
    #[must_use]
    pub const fn barrier(&self) -> &Arc<PeerBarrier> {
        &self.barrier
    }

    /// Path query counters.
    #[must_use]
    pub const fn path_stats(&self) -> &PathStats {
        &self.path_stats
    }

    /// Start publishing visual updates. The caller must keep draining the
    /// returned queue: undrained items hold their turns open.
    pub fn attach_visual_queue(&mut self) -> Arc<UpdateQueue<VisualUpdate>> {
        Arc::clone(self.visual.get_or_insert_with(|| Arc::new(UpdateQueue::new())))
    }

    /// Start publishing peer notices, with the same draining contract as
    /// [`World::attach_visual_queue`].
    pub fn attach_peer_queue(&mut self) -> Arc<UpdateQueue<PeerNotice>> {
        Arc::clone(self.peers.get_or_insert_with(|| Arc::new(UpdateQueue::new())))
    }

    pub(crate) fn emit_visual(&self, turn: u64, update: VisualUpdate) {
        if let Some(queue) = &self.visual {
            queue.push(update, self.reclaimer.check_in(turn));
        }
    }

    pub(crate) fn emit_peer(&self, turn: u64, notice: PeerNotice) {
        if let Some(queue) = &self.peers {
            queue.push(notice, self.reclaimer.check_in(turn));
        }
    }

    pub(crate) fn has_peer_queue(&self) -> bool {
        self.peers.is_some()
    }

    /// Find a path on the current grid, counting the call.
    #[must_use]
    pub fn find_path(&self, start: TileCoord, goal: TileCoord, class: Passability) -> Vec<TileCoord> {
        self.path_stats.record_path();
        pathfinding::find_path(&read(&self.grid), start, goal, class)
    }

    /// Whether a path exists on the current grid, counting the call.
    #[must_use]
    pub fn path_exists(&self, start: TileCoord, goal: TileCoord, class: Passability) -> bool {
        self.path_stats.record_existence_check();
        pathfinding::path_exists(&read(&self.grid), start, goal, class)
    }

    /// Visual update for the current state of a tile.
    pub(crate) fn tile_update(grid: &Grid, coord: TileCoord) -> Option<VisualUpdate> {
        grid.tile(coord).map(|tile| VisualUpdate::TileChanged {
            coord,
            kind: tile.kind(),
            fullness: tile.fullness(),
            owner: tile.owner(),
        })
    }

    /// Claim rate from the configuration.
    pub(crate) fn claim_rate(&self) -> Fixed {
        self.config.claim_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::AgentClass;
    use crate::structure::StructureKind;
    use crate::tile::TileType;

    fn catalog() -> AgentCatalog {
        let mut catalog = AgentCatalog::new();
        catalog
            .insert(AgentClass {
                name: "imp".into(),
                health: Fixed::from_num(10),
                speed: Fixed::ONE,
                dig_rate: Fixed::from_num(5),
                sight_radius: Fixed::from_num(4),
                movement: Passability::Walkable,
            })
            .unwrap();
        catalog
    }

    fn strip_world() -> World {
        let mut world = World::new(SimConfig::default(), catalog()).unwrap();
        for x in 0..4 {
            world
                .grid_mut()
                .insert_tile(Tile::new(TileCoord::new(x, 0), TileType::Bare, Fixed::ZERO))
                .unwrap();
        }
        world
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SimConfig {
            worker_count: 0,
            ..SimConfig::default()
        };
        assert!(matches!(
            World::new(config, AgentCatalog::new()),
            Err(SimError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_spawn_agent_places_occupant() {
        let mut world = strip_world();
        let id = world.spawn_agent("imp", TileCoord::new(1, 0), Some(FactionId(1))).unwrap();

        assert_eq!(world.agent_count(), 1);
        assert_eq!(world.grid().tile(TileCoord::new(1, 0)).unwrap().occupants(), &[id]);
        assert!(matches!(
            world.spawn_agent("imp", TileCoord::new(9, 9), None),
            Err(SimError::MissingTile(_))
        ));
        assert!(matches!(
            world.spawn_agent("dragon", TileCoord::new(0, 0), None),
            Err(SimError::UnknownAgentClass(_))
        ));
    }

    #[test]
    fn test_snapshot_reload_preserves_state() {
        let mut world = strip_world();
        world.spawn_agent("imp", TileCoord::new(2, 0), Some(FactionId(1))).unwrap();
        world.add_faction(FactionId(1));
        world.add_structure(Structure::new(
            StructureKind::Treasury { gold: 3 },
            FactionId(1),
            vec![TileCoord::new(0, 0)],
        ));

        let snapshot = world.snapshot();
        let reloaded = World::from_snapshot(&snapshot, SimConfig::default(), catalog()).unwrap();
        assert_eq!(reloaded.snapshot(), snapshot);
        assert_eq!(reloaded.state_hash(), world.state_hash());
        assert_eq!(reloaded.grid().same_region((0, 0).into(), (3, 0).into()), Some(true));
    }

    #[test]
    fn test_apply_authoritative_rejects_stale_turns() {
        let mut host = strip_world();
        let mut peer = strip_world().with_role(PeerRole::Peer);

        let stale = host.snapshot();
        assert!(matches!(
            peer.apply_authoritative(&stale),
            Err(SimError::StaleTurn { received: 0, local: 0 })
        ));

        host.spawn_agent("imp", TileCoord::new(0, 0), None).unwrap();
        host.advance_turn();
        peer.apply_authoritative(&host.snapshot()).unwrap();
        assert_eq!(peer.turn(), 1);
        assert_eq!(peer.agent_count(), 1);
        assert_eq!(peer.state_hash(), host.state_hash());
    }

    #[test]
    fn test_bulk_edit_recolours_once() {
        let mut world = strip_world();
        let passes = world.grid().reachability().passes();
        world.bulk_edit(|grid| {
            grid.set_type(TileCoord::new(1, 0), TileType::Rock);
            grid.set_type(TileCoord::new(2, 0), TileType::Rock);
        });
        assert_eq!(world.grid().reachability().passes(), passes + 1);
        assert!(world.grid().reachability().is_enabled());
        assert!(!world.path_exists((0, 0).into(), (3, 0).into(), Passability::Walkable));
    }

    #[test]
    fn test_visual_queue_receives_spawns() {
        let mut world = strip_world();
        let queue = world.attach_visual_queue();
        let id = world.spawn_agent("imp", TileCoord::new(0, 0), None).unwrap();

        let item = queue.pop().unwrap();
        assert_eq!(item.turn(), 0);
        assert!(matches!(item.event(), VisualUpdate::AgentSpawned { id: spawned, .. } if *spawned == id));
        assert_eq!(world.reclaimer().outstanding(0), Some(1));
        drop(item);
        assert_eq!(world.reclaimer().outstanding(0), Some(0));
    }

    #[test]
    fn test_path_calls_are_counted() {
        let world = strip_world();
        let _ = world.find_path((0, 0).into(), (3, 0).into(), Passability::Walkable);
        let _ = world.path_exists((0, 0).into(), (3, 0).into(), Passability::Walkable);
        let counts = world.path_stats().take();
        assert_eq!(counts.paths, 1);
        assert_eq!(counts.existence_checks, 1);
    }
}
