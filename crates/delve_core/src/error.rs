//! Error types for the simulation core.
//!
//! Lookups that miss return `Option`, and path requests between missing
//! tiles return an empty path, so the variants here only cover requests
//! that are malformed or data that fails to load.

use thiserror::Error;

use crate::tile::TileCoord;

/// Result type alias using [`SimError`].
pub type Result<T> = std::result::Result<T, SimError>;

/// Top-level error type for all simulation errors.
#[derive(Debug, Error)]
pub enum SimError {
    /// A tile was inserted at a coordinate that is already occupied.
    #[error("Tile already exists at {0}")]
    DuplicateTile(TileCoord),

    /// An agent was placed on a coordinate with no tile.
    #[error("No tile at {0}")]
    MissingTile(TileCoord),

    /// The agent class catalog has no entry with this name.
    #[error("Unknown agent class: {0}")]
    UnknownAgentClass(String),

    /// An agent class definition is unusable.
    #[error("Invalid agent class '{name}': {reason}")]
    InvalidAgentClass {
        /// Class name.
        name: String,
        /// Why the class was rejected.
        reason: String,
    },

    /// An arena ran out of `u32` indices.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(&'static str),

    /// The simulation configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Data file parsing error.
    #[error("Failed to parse {what}: {message}")]
    DataParseError {
        /// What was being parsed (map, catalog, config).
        what: &'static str,
        /// Error message.
        message: String,
    },

    /// Binary or text encoding failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// A peer received a state for a turn it has already applied.
    #[error("Stale authoritative state: received turn {received}, local turn {local}")]
    StaleTurn {
        /// Turn carried by the received state.
        received: u64,
        /// Turn the local world is on.
        local: u64,
    },
}
