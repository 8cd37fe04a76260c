//! Data-driven agent class definitions.
//!
//! A catalog is loaded from RON text. Fixed-point fields are written as
//! their raw bit representation, as everywhere else in the data files.
//!
//! # Example RON
//!
//! ```ron
//! (
//!     classes: [
//!         (
//!             name: "imp",
//!             health: 42949672960,      // 10.0
//!             speed: 4294967296,        // 1.0
//!             dig_rate: 21474836480,    // 5.0
//!             sight_radius: 17179869184, // 4.0
//!             movement: Walkable,
//!         ),
//!     ],
//! )
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::math::{fixed_serde, Fixed};
use crate::tile::Passability;

/// Stats copied from a class into each agent created from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentStats {
    /// Health cap for healing.
    pub max_health: Fixed,
    /// Waypoints consumed per turn.
    pub speed: Fixed,
    /// Fullness removed per dig action.
    pub dig_rate: Fixed,
    /// Radius used by behaviours when scanning for targets.
    pub sight_radius: Fixed,
}

/// One kind of agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentClass {
    /// Unique class name.
    pub name: String,

    /// Starting and maximum health.
    #[serde(with = "fixed_serde")]
    pub health: Fixed,

    /// Movement speed in waypoints per turn.
    #[serde(with = "fixed_serde")]
    pub speed: Fixed,

    /// Fullness removed per dig action.
    #[serde(with = "fixed_serde")]
    pub dig_rate: Fixed,

    /// Sight radius in tiles.
    #[serde(with = "fixed_serde")]
    pub sight_radius: Fixed,

    /// Terrain the class can traverse.
    pub movement: Passability,
}

impl AgentClass {
    /// Stats block copied into new agents.
    #[must_use]
    pub const fn stats(&self) -> AgentStats {
        AgentStats {
            max_health: self.health,
            speed: self.speed,
            dig_rate: self.dig_rate,
            sight_radius: self.sight_radius,
        }
    }

    /// Check the class can be instantiated.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidAgentClass`] for an impassable movement
    /// class, non-positive health, or negative speed.
    pub fn validate(&self) -> Result<()> {
        let reason = if self.movement == Passability::Impassable {
            "movement class must be Walkable or Flyable"
        } else if self.health <= Fixed::ZERO {
            "health must be positive"
        } else if self.speed < Fixed::ZERO {
            "speed must not be negative"
        } else {
            return Ok(());
        };
        Err(SimError::InvalidAgentClass {
            name: self.name.clone(),
            reason: reason.to_string(),
        })
    }
}

/// All known agent classes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCatalog {
    classes: Vec<AgentClass>,
}

impl AgentCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a catalog from RON text.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::DataParseError`] for malformed RON, or the first
    /// validation error.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        let parsed: Self = ron::from_str(text).map_err(|e| SimError::DataParseError {
            what: "agent catalog",
            message: e.to_string(),
        })?;

        let mut catalog = Self::new();
        for class in parsed.classes {
            catalog.insert(class)?;
        }
        Ok(catalog)
    }

    /// Add a class, replacing any class with the same name.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidAgentClass`] if the class fails validation.
    pub fn insert(&mut self, class: AgentClass) -> Result<()> {
        class.validate()?;
        match self.classes.iter_mut().find(|c| c.name == class.name) {
            Some(existing) => *existing = class,
            None => self.classes.push(class),
        }
        Ok(())
    }

    /// Class by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AgentClass> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Class by name, or [`SimError::UnknownAgentClass`].
    ///
    /// # Errors
    ///
    /// Returns an error if no class has this name.
    pub fn require(&self, name: &str) -> Result<&AgentClass> {
        self.get(name)
            .ok_or_else(|| SimError::UnknownAgentClass(name.to_string()))
    }

    /// Iterate classes in load order.
    pub fn iter(&self) -> impl Iterator<Item = &AgentClass> {
        self.classes.iter()
    }

    /// Number of classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True if the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
