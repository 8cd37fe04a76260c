//! Simulation configuration.
//!
//! # Example RON
//!
//! ```ron
//! (
//!     worker_count: 4,
//!     target_turn_ms: 714,
//!     claim_rate: 171798692, // 0.04
//! )
//! ```
//!
//! Omitted fields take their defaults.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::math::{fixed_serde, Fixed};

/// Tunables for the turn scheduler and upkeep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Worker threads per turn.
    pub worker_count: usize,

    /// Target wall-clock length of a turn. The default is about 1.4 turns
    /// per second.
    pub target_turn_ms: u64,

    /// Turns averaged when reporting slack.
    pub slack_window: usize,

    /// Claim progress a claimed tile pushes into each eligible neighbour
    /// per turn.
    #[serde(with = "fixed_serde")]
    pub claim_rate: Fixed,

    /// Mana every faction gains per turn before tile income.
    pub base_mana: u64,

    /// Mana cap.
    pub mana_cap: u64,

    /// Maintain the reachability index from the start.
    pub reachability_enabled: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            target_turn_ms: 714,
            slack_window: 10,
            claim_rate: Fixed::from_bits(0x0A3D_70A4),
            base_mana: 50,
            mana_cap: 250_000,
            reachability_enabled: true,
        }
    }
}

impl SimConfig {
    /// Parse and validate a configuration from RON text.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::DataParseError`] for malformed RON or
    /// [`SimError::InvalidConfig`] if validation fails.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        let config: Self = ron::from_str(text).map_err(|e| SimError::DataParseError {
            what: "simulation config",
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(SimError::InvalidConfig("worker_count must be at least 1".into()));
        }
        if self.slack_window == 0 {
            return Err(SimError::InvalidConfig("slack_window must be at least 1".into()));
        }
        if self.claim_rate < Fixed::ZERO || self.claim_rate > Fixed::ONE {
            return Err(SimError::InvalidConfig("claim_rate must be within [0, 1]".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimConfig::default();
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.target_turn_ms, 714);
        assert_eq!(config.mana_cap, 250_000);
        assert!((config.claim_rate.to_num::<f64>() - 0.04).abs() < 1e-6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_ron_fills_defaults() {
        let config = SimConfig::from_ron_str("(worker_count: 8, reachability_enabled: false)").unwrap();
        assert_eq!(config.worker_count, 8);
        assert!(!config.reachability_enabled);
        assert_eq!(config.slack_window, 10);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = SimConfig::from_ron_str("(worker_count: 0)");
        assert!(matches!(result, Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn test_malformed_ron() {
        let result = SimConfig::from_ron_str("(worker_count: \"many\")");
        assert!(matches!(result, Err(SimError::DataParseError { .. })));
    }
}
