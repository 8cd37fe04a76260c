//! Fixed-point math utilities for deterministic simulation.
//!
//! Tile fullness, agent health, speed and positions all use fixed-point
//! arithmetic so that a host and its peers compute identical turns.

use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// Fixed-point number type for all simulation math.
///
/// Uses 32 bits for integer part and 32 bits for fractional part.
pub type Fixed = I32F32;

/// Fixed-point 2D vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec2Fixed {
    /// X coordinate.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Y coordinate.
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
}

/// Serde support for fixed-point numbers.
///
/// Serializes fixed-point numbers as their raw bit representation (i64)
/// to preserve exact precision across serialization boundaries.
pub mod fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a fixed-point number as its raw bit representation.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_bits().serialize(serializer)
    }

    /// Deserialize a fixed-point number from its raw bit representation.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = i64::deserialize(deserializer)?;
        Ok(Fixed::from_bits(bits))
    }
}

impl Vec2Fixed {
    /// Create a new fixed-point vector.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Zero vector.
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
    };

    /// Vector pointing at the centre of an integer tile coordinate.
    #[must_use]
    pub fn from_tile(x: i32, y: i32) -> Self {
        Self::new(Fixed::from_num(x), Fixed::from_num(y))
    }

    /// Integer tile coordinate containing this position (rounded to nearest).
    #[must_use]
    pub fn to_tile(self) -> (i32, i32) {
        (
            self.x.round().to_num::<i32>(),
            self.y.round().to_num::<i32>(),
        )
    }

    /// Calculate squared distance (avoids sqrt for comparisons).
    #[must_use]
    pub fn distance_squared(self, other: Self) -> Fixed {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

impl std::ops::Add for Vec2Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Vec2Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_round_trip() {
        let v = Vec2Fixed::from_tile(-3, 7);
        assert_eq!(v.to_tile(), (-3, 7));
    }

    #[test]
    fn test_to_tile_rounds_to_nearest() {
        let v = Vec2Fixed::new(Fixed::from_num(2.6), Fixed::from_num(-0.4));
        assert_eq!(v.to_tile(), (3, 0));
    }

    #[test]
    fn test_distance_squared() {
        let a = Vec2Fixed::from_tile(0, 0);
        let b = Vec2Fixed::from_tile(3, 4);
        assert_eq!(a.distance_squared(b), Fixed::from_num(25));
        assert_eq!(b - a, b);
        assert_eq!(a + b, b);
    }
}
