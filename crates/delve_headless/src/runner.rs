//! Load a world from files, run turns, report.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace};

use delve_core::catalog::AgentCatalog;
use delve_core::config::SimConfig;
use delve_core::error::SimError;
use delve_core::notify::{UpdateQueue, VisualUpdate};
use delve_core::scheduler::{AgentBehavior, TickError, TurnScheduler};
use delve_core::snapshot::{FactionRecord, MapSnapshot};
use delve_core::world::World;

/// Errors from a headless run.
#[derive(Debug, Error)]
pub enum RunError {
    /// A data file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A data file was invalid.
    #[error(transparent)]
    Sim(#[from] SimError),

    /// A turn could not run.
    #[error(transparent)]
    Tick(#[from] TickError),
}

/// What to run.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Map file (RON `MapSnapshot`).
    pub map: PathBuf,
    /// Agent catalog file; empty catalog if absent.
    pub catalog: Option<PathBuf>,
    /// Simulation config file; defaults if absent.
    pub config: Option<PathBuf>,
    /// Turns to run.
    pub turns: u64,
    /// Override for the configured worker count.
    pub workers: Option<usize>,
    /// Write the final state as RON here.
    pub save: Option<PathBuf>,
}

/// Summary printed as JSON at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Turn counter after the run.
    pub final_turn: u64,
    /// Hash of the final state.
    pub state_hash: u64,
    /// Living agents at the end.
    pub agents: usize,
    /// Agents reaped during the run.
    pub reaped: usize,
    /// Agents spawned by portals during the run.
    pub spawned: usize,
    /// Objects destroyed by the reclaimer.
    pub destroyed: usize,
    /// Path searches made by behaviours.
    pub path_calls: u64,
    /// Path existence checks made by behaviours.
    pub existence_checks: u64,
    /// Visual updates consumed by the render thread.
    pub visual_updates: usize,
    /// Mean slack over the last turns, if any ran.
    pub average_slack_ms: Option<i64>,
    /// Wall-clock time of the run.
    pub elapsed_ms: u64,
    /// Faction aggregates at the end.
    pub factions: Vec<FactionRecord>,
}

fn read(path: &Path) -> Result<String, RunError> {
    fs::read_to_string(path).map_err(|source| RunError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Build the world described by `config`.
pub fn load_world(config: &RunConfig) -> Result<World, RunError> {
    let snapshot = MapSnapshot::from_ron_str(&read(&config.map)?)?;
    let catalog = match &config.catalog {
        Some(path) => AgentCatalog::from_ron_str(&read(path)?)?,
        None => AgentCatalog::new(),
    };
    let mut sim = match &config.config {
        Some(path) => SimConfig::from_ron_str(&read(path)?)?,
        None => SimConfig::default(),
    };
    if let Some(workers) = config.workers {
        sim.worker_count = workers;
    }
    Ok(World::from_snapshot(&snapshot, sim, catalog)?)
}

/// Count and discard visual updates until told to stop and the queue is empty.
fn render_loop(queue: &UpdateQueue<VisualUpdate>, stop: &AtomicBool) -> usize {
    let mut seen = 0;
    loop {
        match queue.pop_timeout(Duration::from_millis(20)) {
            Some(item) => {
                trace!(turn = item.turn(), update = ?item.event(), "Visual update");
                seen += 1;
            }
            None if stop.load(Ordering::Acquire) => return seen,
            None => {}
        }
    }
}

/// Run `config.turns` turns of `behavior` on a freshly loaded world.
pub fn run<B>(config: &RunConfig, behavior: &B) -> Result<RunReport, RunError>
where
    B: AgentBehavior + ?Sized,
{
    let mut world = load_world(config)?;
    let queue = world.attach_visual_queue();
    let stop = AtomicBool::new(false);
    let started = Instant::now();
    info!(
        turns = config.turns,
        workers = world.config().worker_count,
        agents = world.agent_count(),
        "Run starting"
    );

    let mut scheduler = TurnScheduler::new();
    let mut report = RunReport {
        final_turn: 0,
        state_hash: 0,
        agents: 0,
        reaped: 0,
        spawned: 0,
        destroyed: 0,
        path_calls: 0,
        existence_checks: 0,
        visual_updates: 0,
        average_slack_ms: None,
        elapsed_ms: 0,
        factions: Vec::new(),
    };

    let outcome = thread::scope(|scope| {
        let renderer = thread::Builder::new()
            .name("delve-render".into())
            .spawn_scoped(scope, || render_loop(&queue, &stop))
            .map_err(|source| RunError::Io {
                path: PathBuf::from("<render thread>"),
                source,
            })?;

        let mut result = Ok(());
        for _ in 0..config.turns {
            match scheduler.tick(&mut world, behavior) {
                Ok(tick) => {
                    debug!(turn = tick.turn, moves = tick.moves, "Turn finished");
                    report.reaped += tick.reaped.len();
                    report.spawned += tick.upkeep.spawned;
                    report.destroyed += tick.reclaim.destroyed;
                    report.path_calls += tick.paths.paths;
                    report.existence_checks += tick.paths.existence_checks;
                }
                Err(err) => {
                    result = Err(RunError::from(err));
                    break;
                }
            }
        }

        // Consistency point before reading the final state.
        queue.flush_and_wait();
        stop.store(true, Ordering::Release);
        report.visual_updates = renderer.join().unwrap_or_default();
        result
    });
    outcome?;

    if let Some(path) = &config.save {
        let text = world.snapshot().to_ron()?;
        fs::write(path, text).map_err(|source| RunError::Io {
            path: path.clone(),
            source,
        })?;
    }

    report.final_turn = world.turn();
    report.state_hash = world.state_hash();
    report.agents = world.agent_count();
    report.average_slack_ms = scheduler.average_slack_ms();
    report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    report.factions = world
        .factions()
        .iter()
        .map(|(&id, &stats)| FactionRecord { id, stats })
        .collect();

    info!(
        final_turn = report.final_turn,
        agents = report.agents,
        elapsed_ms = report.elapsed_ms,
        "Run complete"
    );
    Ok(report)
}
