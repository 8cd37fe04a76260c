//! # Delve Core
//!
//! Turn-based tile-grid simulation core.
//!
//! This crate contains **only** simulation logic:
//! - No rendering
//! - No IO beyond parsing and encoding in-memory data
//! - No system randomness
//! - No floating-point math in simulation state (uses fixed-point)
//!
//! A [`world::World`] owns the grid, agents, structures and faction
//! aggregates. A [`scheduler::TurnScheduler`] advances it one turn at a time
//! over a pool of worker threads, and an [`epoch::EpochReclaimer`] keeps
//! removed agents alive until no reader from an earlier turn remains.
//!
//! ## Crate Structure
//!
//! - [`grid`] - Tile arena, neighbour links and region queries
//! - [`reachability`] - Walkable region colouring for constant-time reachability
//! - [`pathfinding`] - A* search, line of sight and corner cutting
//! - [`scheduler`] - Turn phases and the worker pool
//! - [`epoch`] - Deferred destruction keyed by turn
//! - [`notify`] - Queues carrying updates to renderers and peers
//! - [`snapshot`] - Map loading, saving and state hashing

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod agent;
pub mod catalog;
pub mod config;
pub mod epoch;
pub mod error;
pub mod faction;
pub mod grid;
pub mod math;
pub mod notify;
pub mod pathfinding;
pub mod reachability;
pub mod scheduler;
pub mod snapshot;
pub mod structure;
pub mod sync;
pub mod tile;
pub mod world;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::agent::{Agent, AgentId, AgentRegistry, SharedAgent};
    pub use crate::catalog::{AgentCatalog, AgentClass, AgentStats};
    pub use crate::config::SimConfig;
    pub use crate::epoch::{EpochGuard, EpochReclaimer, ReclaimReport};
    pub use crate::error::{Result, SimError};
    pub use crate::faction::{FactionId, FactionStats};
    pub use crate::grid::Grid;
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::notify::{PeerNotice, Queued, UpdateQueue, VisualUpdate};
    pub use crate::pathfinding::{cut_corners, find_path, line_of_sight, path_exists, PathCounts};
    pub use crate::scheduler::{
        AgentBehavior, FollowWaypoints, TickError, TickReport, TurnContext, TurnPhase,
        TurnScheduler,
    };
    pub use crate::snapshot::{AgentRecord, FactionRecord, MapSnapshot, TileRecord};
    pub use crate::structure::{Structure, StructureKind};
    pub use crate::sync::{PeerBarrier, PeerId, PeerRole};
    pub use crate::tile::{Direction, Passability, Tile, TileCoord, TileType};
    pub use crate::world::World;
}
