//! # Delve Test Utilities
//!
//! Shared testing utilities for all crates:
//! - ASCII grid and catalog fixtures
//! - Breadth-first search baseline for path checks
//! - Determinism test harness
//! - Property-based testing strategies

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod baseline;
pub mod determinism;
pub mod fixtures;

/// Re-export proptest for convenience.
pub use proptest;
