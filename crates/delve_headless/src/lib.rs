//! Headless turn runner for CI verification and soak testing.
//!
//! Loads a map, an agent catalog and a simulation config from RON files,
//! runs a number of turns with the reference [`behavior::Forager`]
//! behaviour while a render thread drains the visual update queue, and
//! reports the outcome as JSON.
//!
//! # Example
//!
//! ```bash
//! cargo run -p delve_headless -- run \
//!     --map crates/delve_headless/data/cavern.ron \
//!     --catalog crates/delve_headless/data/catalog.ron \
//!     --turns 200
//! ```

pub mod behavior;
pub mod runner;

pub use behavior::Forager;
pub use runner::{load_world, run, RunConfig, RunError, RunReport};
