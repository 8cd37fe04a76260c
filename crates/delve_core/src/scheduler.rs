//! The turn scheduler.
//!
//! One call to [`TurnScheduler::tick`] advances the world by one turn:
//!
//! 1. **Dispatching**: live agents are split into contiguous slices, one per
//!    worker thread. Workers check in for the turn, run each agent's
//!    [`AgentBehavior`] and move it along its waypoints.
//! 2. **Aggregating**: damage and gold requested by behaviours are applied in
//!    worker order, then request order.
//! 3. **Upkeep**: structures, area claiming, spawning and faction aggregates,
//!    with exclusive access to the world.
//! 4. **Reclaiming**: dead agents are removed and handed to the epoch
//!    reclaimer, which destroys everything from turns nobody still observes.
//!
//! Worker threads are spawned behind a start gate. If any spawn fails, the
//! gate opens with an abort signal, no worker touches the world and the tick
//! returns [`TickError::WorkerSpawn`].

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Condvar, Mutex, PoisonError, RwLockReadGuard};
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::agent::{Agent, AgentId, SharedAgent};
use crate::config::SimConfig;
use crate::epoch::ReclaimReport;
use crate::faction::{FactionId, FactionStats};
use crate::grid::Grid;
use crate::math::Fixed;
use crate::notify::{PeerNotice, VisualUpdate};
use crate::pathfinding::{self, PathCounts};
use crate::structure::StructureKind;
use crate::sync::PeerId;
use crate::tile::{Passability, TileCoord, TileType, FULLNESS_THRESHOLD};
use crate::world::{exclusive, lock_agent, read, write, World};

/// Why a tick did not run.
#[derive(Debug, Error)]
pub enum TickError {
    /// The host is waiting for peers to apply the state it last published.
    #[error("Turn {turn} is waiting for acknowledgements from {missing:?}")]
    AwaitingPeers {
        /// Turn that could not start.
        turn: u64,
        /// Peers that are not yet on this turn.
        missing: Vec<PeerId>,
    },

    /// Peer worlds follow their host and never run turns.
    #[error("Peer worlds do not run turns; apply the host's state instead")]
    NotAuthoritative,

    /// A worker thread could not be started. Nothing was changed.
    #[error("Failed to spawn worker {worker}: {source}")]
    WorkerSpawn {
        /// Index of the worker that failed.
        worker: usize,
        /// OS error.
        #[source]
        source: io::Error,
    },
}

/// Where the scheduler is within a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TurnPhase {
    /// Between turns.
    #[default]
    Idle,
    /// Workers are running agent turns.
    Dispatching,
    /// Deferred behaviour effects are applied.
    Aggregating,
    /// Structures, claiming, spawning and faction aggregates.
    Upkeep,
    /// Dead agents are reaped and finished turns retired.
    Reclaiming,
}

/// Per-turn decision logic for agents.
///
/// Called once per turn for every living agent, from a worker thread. The
/// agent's own state may be changed freely; everything else goes through
/// the [`TurnContext`].
pub trait AgentBehavior: Sync {
    /// Take one turn.
    fn take_turn(&self, ctx: &mut TurnContext<'_>, agent: &mut Agent);
}

impl<F> AgentBehavior for F
where
    F: Fn(&mut TurnContext<'_>, &mut Agent) + Sync,
{
    fn take_turn(&self, ctx: &mut TurnContext<'_>, agent: &mut Agent) {
        self(ctx, agent);
    }
}

/// Behaviour that makes no decisions; agents only walk their waypoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct FollowWaypoints;

impl AgentBehavior for FollowWaypoints {
    fn take_turn(&self, _ctx: &mut TurnContext<'_>, _agent: &mut Agent) {}
}

/// A worker's view of the world during one turn.
///
/// Grid reads and edits take the grid lock only for the duration of each
/// call. Effects on other agents are queued and applied after all workers
/// finish.
pub struct TurnContext<'w> {
    world: &'w World,
    turn: u64,
    worker: usize,
    damage: Vec<(AgentId, Fixed)>,
    deposits: Vec<(FactionId, u64)>,
}

impl<'w> TurnContext<'w> {
    fn new(world: &'w World, turn: u64, worker: usize) -> Self {
        Self {
            world,
            turn,
            worker,
            damage: Vec::new(),
            deposits: Vec::new(),
        }
    }

    /// Turn being run.
    #[must_use]
    pub const fn turn(&self) -> u64 {
        self.turn
    }

    /// Index of the worker running this context.
    #[must_use]
    pub const fn worker(&self) -> usize {
        self.worker
    }

    /// Simulation configuration.
    #[must_use]
    pub const fn config(&self) -> &'w SimConfig {
        &self.world.config
    }

    /// Read access to the grid. Release the guard before calling any other
    /// context method that edits the grid.
    pub fn grid(&self) -> RwLockReadGuard<'w, Grid> {
        read(&self.world.grid)
    }

    /// Shortest path for a mover of `class`.
    #[must_use]
    pub fn find_path(&self, start: TileCoord, goal: TileCoord, class: Passability) -> Vec<TileCoord> {
        self.world.find_path(start, goal, class)
    }

    /// Whether a mover of `class` can get from `start` to `goal`.
    #[must_use]
    pub fn path_exists(&self, start: TileCoord, goal: TileCoord, class: Passability) -> bool {
        self.world.path_exists(start, goal, class)
    }

    /// Corner-cut a raw path against the current grid.
    #[must_use]
    pub fn cut_corners(&self, path: &[TileCoord], class: Passability) -> Vec<TileCoord> {
        pathfinding::cut_corners(&read(&self.world.grid), path, class)
    }

    /// Tiles visible from `center` within `radius`.
    #[must_use]
    pub fn visible_tiles(&self, center: TileCoord, radius: Fixed) -> Vec<TileCoord> {
        read(&self.world.grid).visible_tiles(center, radius)
    }

    /// Agents standing within `radius` of `center`, with their tiles.
    #[must_use]
    pub fn agents_near(&self, center: TileCoord, radius: Fixed) -> Vec<(TileCoord, AgentId)> {
        let grid = read(&self.world.grid);
        grid.circular_region(center, radius)
            .into_iter()
            .filter_map(|coord| grid.tile(coord))
            .flat_map(|tile| tile.occupants().iter().map(move |&id| (tile.coord(), id)))
            .collect()
    }

    /// Remove up to `amount` fullness from a tile. Returns the amount
    /// actually removed, or `None` if there is no tile.
    pub fn dig(&mut self, coord: TileCoord, amount: Fixed) -> Option<Fixed> {
        let (removed, update) = {
            let mut grid = write(&self.world.grid);
            let before = grid.tile(coord)?.fullness();
            let remaining = grid.dig(coord, amount)?;
            (before - remaining, World::tile_update(&grid, coord))
        };
        if removed > Fixed::ZERO {
            if let Some(update) = update {
                self.world.emit_visual(self.turn, update);
            }
        }
        Some(removed)
    }

    /// Push a tile's claim toward `faction` at the configured rate.
    /// Returns `Some(true)` once the tile is claimed floor of `faction`.
    pub fn claim(&mut self, coord: TileCoord, faction: FactionId) -> Option<bool> {
        let (claimed, update) = {
            let mut grid = write(&self.world.grid);
            let claimed = grid.claim_for(coord, faction, self.world.claim_rate())?;
            (claimed, World::tile_update(&grid, coord))
        };
        if let Some(update) = update {
            self.world.emit_visual(self.turn, update);
        }
        Some(claimed)
    }

    /// Queue damage to another agent, applied after all workers finish.
    pub fn damage(&mut self, target: AgentId, amount: Fixed) {
        self.damage.push((target, amount));
    }

    /// Queue gold for the faction's first treasury.
    pub fn deposit_gold(&mut self, faction: FactionId, amount: u64) {
        self.deposits.push((faction, amount));
    }
}

/// Effects gathered by one worker.
#[derive(Debug, Default)]
struct WorkerOutcome {
    ran: usize,
    moves: usize,
    damage: Vec<(AgentId, Fixed)>,
    deposits: Vec<(FactionId, u64)>,
}

/// What upkeep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpkeepReport {
    /// Structures removed after losing all their tiles.
    pub structures_removed: usize,
    /// Agents healed by quarters.
    pub healed: usize,
    /// Claim pushes from claimed tiles into neighbours.
    pub claim_pushes: usize,
    /// Agents spawned by portals.
    pub spawned: usize,
}

/// Summary of one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Turn that was run.
    pub turn: u64,
    /// Worker threads used.
    pub workers: usize,
    /// Agent turns taken.
    pub agents_run: usize,
    /// Agents that changed tile.
    pub moves: usize,
    /// Damage requests applied.
    pub damage_applied: usize,
    /// Gold deposited into treasuries.
    pub gold_deposited: u64,
    /// Upkeep summary.
    pub upkeep: UpkeepReport,
    /// Agents removed this turn.
    pub reaped: Vec<AgentId>,
    /// Path queries made this turn.
    pub paths: PathCounts,
    /// Reclamation summary.
    pub reclaim: ReclaimReport,
    /// Wall-clock time of the turn.
    pub elapsed_ms: u64,
    /// Target turn length minus elapsed time.
    pub slack_ms: i64,
    /// Mean slack over the configured window of previous turns.
    pub average_slack_ms: Option<i64>,
}

/// Opens once all workers are spawned, with either go or abort.
#[derive(Debug, Default)]
struct StartGate {
    state: Mutex<Option<bool>>,
    opened: Condvar,
}

impl StartGate {
    fn open(&self, go: bool) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(go);
        self.opened.notify_all();
    }

    fn wait(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self
            .opened
            .wait_while(state, |s| s.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        state.unwrap_or(false)
    }
}

/// Drives turns over a fixed-size worker pool.
#[derive(Debug, Default)]
pub struct TurnScheduler {
    phase: TurnPhase,
    slack: VecDeque<i64>,
    #[cfg(test)]
    spawn_limit: Option<usize>,
}

impl TurnScheduler {
    /// Create an idle scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase; [`TurnPhase::Idle`] outside `tick`.
    #[must_use]
    pub const fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Mean slack of the recorded turns, if any.
    #[must_use]
    pub fn average_slack_ms(&self) -> Option<i64> {
        if self.slack.is_empty() {
            return None;
        }
        let total: i64 = self.slack.iter().sum();
        Some(total / self.slack.len() as i64)
    }

    fn set_phase(&mut self, phase: TurnPhase) {
        trace!(?phase, "Turn phase");
        self.phase = phase;
    }

    /// Run one turn.
    ///
    /// # Errors
    ///
    /// Returns a [`TickError`] without changing the world if the peer
    /// barrier blocks the turn or a worker thread cannot be spawned.
    ///
    /// # Panics
    ///
    /// Re-raises any panic from an agent behaviour.
    pub fn tick<B>(&mut self, world: &mut World, behavior: &B) -> Result<TickReport, TickError>
    where
        B: AgentBehavior + ?Sized,
    {
        let turn = world.turn();
        if !world.barrier().is_authoritative() {
            warn!(turn, "Tick requested on a peer world");
            return Err(TickError::NotAuthoritative);
        }
        let missing = world.barrier().missing_for(turn);
        if !missing.is_empty() {
            debug!(turn, ?missing, "Waiting for peer acknowledgements");
            return Err(TickError::AwaitingPeers { turn, missing });
        }

        let started = Instant::now();
        let average_slack_ms = self.average_slack_ms();
        debug!(turn, average_slack_ms, "Turn starting");

        self.set_phase(TurnPhase::Dispatching);
        let handles = world.agents().handles();
        let outcomes = match self.dispatch(world, behavior, turn, &handles) {
            Ok(outcomes) => outcomes,
            Err(err) => {
                self.set_phase(TurnPhase::Idle);
                warn!(turn, error = %err, "Turn aborted");
                return Err(err);
            }
        };
        drop(handles);

        let mut report = TickReport {
            turn,
            workers: outcomes.len(),
            agents_run: outcomes.iter().map(|o| o.ran).sum(),
            moves: outcomes.iter().map(|o| o.moves).sum(),
            average_slack_ms,
            ..TickReport::default()
        };

        self.set_phase(TurnPhase::Aggregating);
        let (damage_applied, gold_deposited) = aggregate(world, &outcomes);
        report.damage_applied = damage_applied;
        report.gold_deposited = gold_deposited;

        self.set_phase(TurnPhase::Upkeep);
        let (upkeep, updates) = upkeep(world, turn);
        report.upkeep = upkeep;
        for update in updates {
            world.emit_visual(turn, update);
        }

        self.set_phase(TurnPhase::Reclaiming);
        let (reaped, updates) = reap(world, turn);
        report.reaped = reaped;
        for update in updates {
            world.emit_visual(turn, update);
        }
        report.reclaim = world.reclaimer.retire();

        world.advance_turn();
        report.paths = world.path_stats.take();

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let target_ms = i64::try_from(world.config().target_turn_ms).unwrap_or(i64::MAX);
        let slack_ms = target_ms.saturating_sub(i64::try_from(elapsed_ms).unwrap_or(i64::MAX));
        report.elapsed_ms = elapsed_ms;
        report.slack_ms = slack_ms;
        self.slack.push_back(slack_ms);
        while self.slack.len() > world.config().slack_window {
            self.slack.pop_front();
        }

        if world.has_peer_queue() {
            let snapshot = world.snapshot();
            world.emit_peer(
                turn,
                PeerNotice::TurnAdvanced {
                    turn: world.turn(),
                    snapshot,
                },
            );
        }

        self.set_phase(TurnPhase::Idle);
        debug!(
            turn,
            agents = report.agents_run,
            reaped = report.reaped.len(),
            destroyed = report.reclaim.destroyed,
            path_calls = report.paths.paths,
            elapsed_ms,
            "Turn complete"
        );
        Ok(report)
    }

    fn dispatch<B>(
        &self,
        world: &World,
        behavior: &B,
        turn: u64,
        agents: &[(AgentId, SharedAgent)],
    ) -> Result<Vec<WorkerOutcome>, TickError>
    where
        B: AgentBehavior + ?Sized,
    {
        if agents.is_empty() {
            return Ok(Vec::new());
        }
        let workers = world.config().worker_count.clamp(1, agents.len());
        let chunk = agents.len().div_ceil(workers);
        let gate = StartGate::default();

        thread::scope(|scope| {
            let gate = &gate;
            let mut handles = Vec::with_capacity(workers);
            let mut failure = None;

            for (worker, slice) in agents.chunks(chunk).enumerate() {
                let spawned = self.spawn_worker(scope, worker, move || {
                    if !gate.wait() {
                        return None;
                    }
                    Some(run_slice(world, behavior, turn, worker, slice))
                });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(source) => {
                        failure = Some(TickError::WorkerSpawn { worker, source });
                        break;
                    }
                }
            }

            gate.open(failure.is_none());

            let mut outcomes = Vec::with_capacity(handles.len());
            for handle in handles {
                match handle.join() {
                    Ok(Some(outcome)) => outcomes.push(outcome),
                    Ok(None) => {}
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }

            match failure {
                Some(err) => Err(err),
                None => Ok(outcomes),
            }
        })
    }

    fn spawn_worker<'scope, 'env, F>(
        &self,
        scope: &'scope Scope<'scope, 'env>,
        worker: usize,
        work: F,
    ) -> io::Result<ScopedJoinHandle<'scope, Option<WorkerOutcome>>>
    where
        F: FnOnce() -> Option<WorkerOutcome> + Send + 'scope,
    {
        #[cfg(test)]
        {
            if self.spawn_limit.is_some_and(|limit| worker >= limit) {
                return Err(io::Error::other("worker limit reached"));
            }
        }
        thread::Builder::new()
            .name(format!("delve-worker-{worker}"))
            .spawn_scoped(scope, work)
    }
}

fn run_slice<B>(
    world: &World,
    behavior: &B,
    turn: u64,
    worker: usize,
    slice: &[(AgentId, SharedAgent)],
) -> WorkerOutcome
where
    B: AgentBehavior + ?Sized,
{
    let _epoch = world.reclaimer.check_in(turn);
    let mut ctx = TurnContext::new(world, turn, worker);
    let mut outcome = WorkerOutcome::default();

    for (id, handle) in slice {
        let mut agent = lock_agent(handle);
        if !agent.is_alive() {
            continue;
        }
        behavior.take_turn(&mut ctx, &mut agent);
        outcome.ran += 1;
        if !agent.is_alive() {
            continue;
        }

        let movement = agent.movement();
        let step = {
            let grid = read(&world.grid);
            agent.advance(|coord| {
                grid.tile(coord)
                    .is_some_and(|tile| movement.permits(tile.passability()))
            })
        };
        if let Some((from, to)) = step {
            {
                let mut grid = write(&world.grid);
                grid.remove_occupant(from, *id);
                grid.add_occupant(to, *id);
            }
            world.emit_visual(turn, VisualUpdate::AgentMoved { id: *id, from, to });
            outcome.moves += 1;
        }
    }

    outcome.damage = ctx.damage;
    outcome.deposits = ctx.deposits;
    outcome
}

fn aggregate(world: &mut World, outcomes: &[WorkerOutcome]) -> (usize, u64) {
    let World {
        agents, structures, ..
    } = world;
    let registry = exclusive(agents);
    let structures = exclusive(structures);

    let mut applied = 0;
    let mut deposited = 0;
    for outcome in outcomes {
        for &(target, amount) in &outcome.damage {
            if let Some(handle) = registry.get(target) {
                lock_agent(handle).damage(amount);
                applied += 1;
            }
        }
        for &(faction, gold) in &outcome.deposits {
            let treasury = structures.iter_mut().find(|s| {
                s.owner == faction && matches!(s.kind, StructureKind::Treasury { .. })
            });
            if let Some(treasury) = treasury {
                treasury.deposit(gold);
                deposited += gold;
            }
        }
    }
    (applied, deposited)
}

fn upkeep(world: &mut World, turn: u64) -> (UpkeepReport, Vec<VisualUpdate>) {
    let World {
        config,
        catalog,
        grid,
        agents,
        structures,
        factions,
        ..
    } = world;
    let grid = exclusive(grid);
    let registry = exclusive(agents);
    let structures = exclusive(structures);
    let mut report = UpkeepReport::default();
    let mut updates = Vec::new();

    for structure in structures.iter_mut() {
        structure.retain_owned(grid);
    }
    let before = structures.len();
    structures.retain(|s| !s.is_empty());
    report.structures_removed = before - structures.len();

    for structure in structures.iter() {
        let StructureKind::Quarters { heal_per_turn } = &structure.kind else {
            continue;
        };
        for &coord in structure.tiles() {
            let Some(tile) = grid.tile(coord) else {
                continue;
            };
            for &id in tile.occupants() {
                let Some(handle) = registry.get(id) else {
                    continue;
                };
                let mut agent = lock_agent(handle);
                if agent.is_alive() && agent.faction() == Some(structure.owner) {
                    agent.heal(*heal_per_turn);
                    report.healed += 1;
                }
            }
        }
    }

    // Gather every push before applying any, so new claims spread next turn.
    let mut claims = Vec::new();
    for tile in grid.iter() {
        let (TileType::Claimed, Some(owner)) = (tile.kind(), tile.owner()) else {
            continue;
        };
        for &idx in tile.neighbor_slots().iter().flatten() {
            let neighbor = grid.tile_at(idx);
            if neighbor.kind() == TileType::Bare
                && neighbor.fullness() <= FULLNESS_THRESHOLD
                && neighbor.occupants().is_empty()
            {
                claims.push((neighbor.coord(), owner));
            }
        }
    }
    for (coord, owner) in claims {
        let before = grid.tile(coord).map(|t| (t.kind(), t.owner()));
        grid.claim_for(coord, owner, config.claim_rate);
        report.claim_pushes += 1;
        if grid.tile(coord).map(|t| (t.kind(), t.owner())) != before {
            updates.extend(World::tile_update(grid, coord));
        }
    }

    let mut living: BTreeMap<FactionId, u32> = BTreeMap::new();
    for (_, handle) in registry.handles() {
        let agent = lock_agent(&handle);
        if let (true, Some(faction)) = (agent.is_alive(), agent.faction()) {
            *living.entry(faction).or_default() += 1;
        }
    }

    for structure in structures.iter() {
        let StructureKind::Portal {
            class,
            interval,
            max_agents,
        } = &structure.kind
        else {
            continue;
        };
        if *interval == 0 || turn % interval != 0 {
            continue;
        }
        let count = living.entry(structure.owner).or_default();
        if *count >= *max_agents {
            continue;
        }
        let Some(class) = catalog.get(class) else {
            warn!(class = %class, owner = %structure.owner, "Portal class missing from catalog");
            continue;
        };
        let Some(&tile) = structure.tiles().first() else {
            continue;
        };
        if !grid
            .tile(tile)
            .is_some_and(|t| class.movement.permits(t.passability()))
        {
            continue;
        }
        let id = match registry.insert(|id| Agent::new(id, class, tile, Some(structure.owner))) {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, owner = %structure.owner, "Portal spawn failed");
                break;
            }
        };
        grid.add_occupant(tile, id);
        *count += 1;
        report.spawned += 1;
        updates.push(VisualUpdate::AgentSpawned {
            id,
            class: class.name.clone(),
            tile,
        });
    }

    let mut fresh: BTreeMap<FactionId, FactionStats> = factions
        .keys()
        .map(|&id| (id, FactionStats::default()))
        .collect();
    for tile in grid.iter() {
        if let (TileType::Claimed, Some(owner)) = (tile.kind(), tile.owner()) {
            fresh.entry(owner).or_default().claimed_tiles += 1;
        }
    }
    for structure in structures.iter() {
        fresh.entry(structure.owner).or_default().gold += structure.gold();
    }
    for (faction, count) in living {
        fresh.entry(faction).or_default().agents = count;
    }
    for (id, stats) in &mut fresh {
        stats.mana = factions.get(id).map_or(0, |previous| previous.mana);
        stats.accrue_mana(config.base_mana, config.mana_cap);
    }
    *factions = fresh;

    (report, updates)
}

fn reap(world: &mut World, turn: u64) -> (Vec<AgentId>, Vec<VisualUpdate>) {
    let World {
        grid,
        agents,
        reclaimer,
        ..
    } = world;
    let grid = exclusive(grid);
    let registry = exclusive(agents);

    let dead: Vec<(AgentId, TileCoord)> = registry
        .handles()
        .into_iter()
        .filter_map(|(id, handle)| {
            let mut agent = lock_agent(&handle);
            if agent.is_alive() {
                return None;
            }
            agent.kill();
            Some((id, agent.tile()))
        })
        .collect();

    let mut updates = Vec::with_capacity(dead.len());
    let mut reaped = Vec::with_capacity(dead.len());
    for (id, tile) in dead {
        grid.remove_occupant(tile, id);
        if let Some(handle) = registry.remove(id) {
            reclaimer.defer(turn, handle);
        }
        debug!(agent = %id, %tile, "Agent reaped");
        updates.push(VisualUpdate::AgentRemoved { id, tile });
        reaped.push(id);
    }
    (reaped, updates)
}
