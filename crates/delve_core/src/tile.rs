//! Tiles, coordinates and passability classes.
//!
//! A tile's passability class is derived from its type and fullness and is
//! cached on the tile. Every write to either input goes through
//! [`Tile::set_type`] or [`Tile::set_fullness`], which recompute the class
//! and clear the tile's reachability colour.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::faction::FactionId;
use crate::math::Fixed;

/// Fullness above which any tile is impassable (0.1 in I32F32 bits).
pub const FULLNESS_THRESHOLD: Fixed = Fixed::from_bits(0x1999_999A);

/// Maximum fullness of a tile.
pub const MAX_FULLNESS: Fixed = Fixed::const_from_int(100);

/// Integer tile coordinate.
///
/// Ordered by `x` then `y`, which is the iteration order of the grid index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl TileCoord {
    /// Create a coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The coordinate one step in `dir`.
    #[must_use]
    pub const fn step(self, dir: Direction) -> Self {
        let (dx, dy) = dir.offset();
        Self::new(self.x + dx, self.y + dy)
    }

    /// Manhattan distance between two coordinates.
    #[must_use]
    pub const fn manhattan(self, other: Self) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// True if `other` is one of the four orthogonal neighbours.
    #[must_use]
    pub const fn is_adjacent(self, other: Self) -> bool {
        self.manhattan(other) == 1
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<(i32, i32)> for TileCoord {
    fn from((x, y): (i32, i32)) -> Self {
        Self::new(x, y)
    }
}

/// The four orthogonal directions, in neighbour-slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// +x
    East,
    /// +y
    North,
    /// -x
    West,
    /// -y
    South,
}

impl Direction {
    /// All directions in slot order.
    pub const ALL: [Self; 4] = [Self::East, Self::North, Self::West, Self::South];

    /// Coordinate offset for one step.
    #[must_use]
    pub const fn offset(self) -> (i32, i32) {
        match self {
            Self::East => (1, 0),
            Self::North => (0, 1),
            Self::West => (-1, 0),
            Self::South => (0, -1),
        }
    }

    /// Direction pointing back.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::East => Self::West,
            Self::North => Self::South,
            Self::West => Self::East,
            Self::South => Self::North,
        }
    }

    /// Neighbour slot index.
    #[must_use]
    pub const fn slot(self) -> usize {
        self as usize
    }
}

/// Terrain type of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TileType {
    /// Plain dug-out or diggable earth.
    #[default]
    Bare,
    /// Earth containing a resource vein.
    Resource,
    /// Solid rock, never passable.
    Rock,
    /// Liquid hazard, only fliers may cross.
    Lava,
    /// Floor claimed by a faction.
    Claimed,
}

/// Coarse movement capability a tile exposes and an agent requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Passability {
    /// Nothing may enter.
    Impassable,
    /// Walkers and fliers may enter.
    #[default]
    Walkable,
    /// Only fliers may enter.
    Flyable,
}

impl Passability {
    /// Derive the class of a tile from its type and fullness.
    #[must_use]
    pub fn of(kind: TileType, fullness: Fixed) -> Self {
        if fullness > FULLNESS_THRESHOLD {
            return Self::Impassable;
        }
        match kind {
            TileType::Bare | TileType::Resource | TileType::Claimed => Self::Walkable,
            TileType::Rock => Self::Impassable,
            TileType::Lava => Self::Flyable,
        }
    }

    /// Whether an agent requiring `self` may enter a tile of class `tile`.
    ///
    /// # Panics
    ///
    /// Panics if `self` is [`Passability::Impassable`]: no movement class
    /// may request impassable terrain, and reaching this point means a
    /// caller skipped class validation.
    #[must_use]
    pub fn permits(self, tile: Passability) -> bool {
        match self {
            Self::Walkable => tile == Self::Walkable,
            Self::Flyable => matches!(tile, Self::Walkable | Self::Flyable),
            Self::Impassable => {
                panic!("movement requested through impassable terrain; agent classes must be walkable or flyable")
            }
        }
    }
}

/// Index of a tile inside the grid arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileIdx(pub(crate) u32);

impl TileIdx {
    /// Position in the arena.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A single map tile.
#[derive(Debug, Clone)]
pub struct Tile {
    coord: TileCoord,
    kind: TileType,
    fullness: Fixed,
    passability: Passability,
    pub(crate) reach_color: Option<u32>,
    pub(crate) neighbors: [Option<TileIdx>; 4],
    pub(crate) occupants: Vec<AgentId>,
    owner: Option<FactionId>,
    claim_progress: Fixed,
}

impl Tile {
    /// Create an unlinked tile. Fullness is clamped to `[0, 100]`.
    #[must_use]
    pub fn new(coord: TileCoord, kind: TileType, fullness: Fixed) -> Self {
        let fullness = fullness.clamp(Fixed::ZERO, MAX_FULLNESS);
        Self {
            coord,
            kind,
            fullness,
            passability: Passability::of(kind, fullness),
            reach_color: None,
            neighbors: [None; 4],
            occupants: Vec::new(),
            owner: None,
            claim_progress: Fixed::ZERO,
        }
    }

    /// Create a tile already owned by `owner` (claimed floor, level loading).
    #[must_use]
    pub fn with_owner(mut self, owner: Option<FactionId>) -> Self {
        self.owner = owner;
        if owner.is_some() && self.kind == TileType::Claimed {
            self.claim_progress = Fixed::ONE;
        }
        self
    }

    /// Tile coordinate.
    #[must_use]
    pub const fn coord(&self) -> TileCoord {
        self.coord
    }

    /// Terrain type.
    #[must_use]
    pub const fn kind(&self) -> TileType {
        self.kind
    }

    /// Current fullness in `[0, 100]`.
    #[must_use]
    pub const fn fullness(&self) -> Fixed {
        self.fullness
    }

    /// Cached passability class.
    #[must_use]
    pub const fn passability(&self) -> Passability {
        self.passability
    }

    /// Whether sight passes through this tile. Solid tiles and rock block it.
    #[must_use]
    pub fn permits_vision(&self) -> bool {
        self.fullness <= FULLNESS_THRESHOLD && self.kind != TileType::Rock
    }

    /// Reachability colour, `None` while unset or not walkable.
    #[must_use]
    pub const fn reach_color(&self) -> Option<u32> {
        self.reach_color
    }

    /// Agents standing on this tile, unordered.
    #[must_use]
    pub fn occupants(&self) -> &[AgentId] {
        &self.occupants
    }

    /// Owning faction, if any.
    #[must_use]
    pub const fn owner(&self) -> Option<FactionId> {
        self.owner
    }

    /// Claim progress toward the owner, in `[0, 1]`.
    #[must_use]
    pub const fn claim_progress(&self) -> Fixed {
        self.claim_progress
    }

    /// Neighbour arena indices in [`Direction`] slot order.
    #[must_use]
    pub fn neighbor_slots(&self) -> &[Option<TileIdx>; 4] {
        &self.neighbors
    }

    /// Restore claim progress from a saved record.
    pub(crate) fn restore_claim_progress(&mut self, progress: Fixed) {
        self.claim_progress = progress.clamp(Fixed::ZERO, Fixed::ONE);
    }

    /// Set fullness. Returns `true` if the passability class changed.
    pub(crate) fn set_fullness(&mut self, fullness: Fixed) -> bool {
        self.fullness = fullness.clamp(Fixed::ZERO, MAX_FULLNESS);
        self.refresh_passability()
    }

    /// Set terrain type. Returns `true` if the passability class changed.
    pub(crate) fn set_type(&mut self, kind: TileType) -> bool {
        self.kind = kind;
        self.refresh_passability()
    }

    /// Push this tile's claim toward `faction` by `rate`.
    ///
    /// A tile owned by another faction first loses progress; once the
    /// progress crosses zero the tile flips owner. Progress reaching one
    /// turns the tile into [`TileType::Claimed`]. Returns `true` if the
    /// passability class changed.
    pub(crate) fn claim_for(&mut self, faction: FactionId, rate: Fixed) -> bool {
        if self.owner == Some(faction) {
            self.claim_progress += rate;
            if self.claim_progress >= Fixed::ONE {
                self.claim_progress = Fixed::ONE;
                if self.kind != TileType::Claimed {
                    return self.set_type(TileType::Claimed);
                }
            }
        } else {
            self.claim_progress -= rate;
            if self.claim_progress <= Fixed::ZERO {
                self.claim_progress = -self.claim_progress;
                self.owner = Some(faction);
            }
        }
        false
    }

    fn refresh_passability(&mut self) -> bool {
        let previous = self.passability;
        self.passability = Passability::of(self.kind, self.fullness);
        self.reach_color = None;
        previous != self.passability
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(n: i32) -> Fixed {
        Fixed::from_num(n)
    }

    #[test]
    fn test_passability_rules() {
        assert_eq!(Passability::of(TileType::Bare, fixed(0)), Passability::Walkable);
        assert_eq!(Passability::of(TileType::Resource, fixed(0)), Passability::Walkable);
        assert_eq!(Passability::of(TileType::Claimed, fixed(0)), Passability::Walkable);
        assert_eq!(Passability::of(TileType::Rock, fixed(0)), Passability::Impassable);
        assert_eq!(Passability::of(TileType::Lava, fixed(0)), Passability::Flyable);
        assert_eq!(Passability::of(TileType::Bare, fixed(100)), Passability::Impassable);
        assert_eq!(Passability::of(TileType::Lava, fixed(1)), Passability::Impassable);
    }

    #[test]
    fn test_permits() {
        assert!(Passability::Walkable.permits(Passability::Walkable));
        assert!(!Passability::Walkable.permits(Passability::Flyable));
        assert!(Passability::Flyable.permits(Passability::Walkable));
        assert!(Passability::Flyable.permits(Passability::Flyable));
        assert!(!Passability::Flyable.permits(Passability::Impassable));
    }

    #[test]
    #[should_panic(expected = "impassable")]
    fn test_impassable_request_panics() {
        let _ = Passability::Impassable.permits(Passability::Walkable);
    }

    #[test]
    fn test_set_fullness_clears_color_and_reports_change() {
        let mut tile = Tile::new(TileCoord::new(0, 0), TileType::Bare, fixed(100));
        tile.reach_color = Some(3);
        assert_eq!(tile.passability(), Passability::Impassable);

        assert!(tile.set_fullness(fixed(0)));
        assert_eq!(tile.passability(), Passability::Walkable);
        assert_eq!(tile.reach_color(), None);

        tile.reach_color = Some(4);
        assert!(!tile.set_fullness(Fixed::from_num(0.05)));
        assert_eq!(tile.reach_color(), None);
    }

    #[test]
    fn test_fullness_is_clamped() {
        let tile = Tile::new(TileCoord::new(0, 0), TileType::Bare, fixed(250));
        assert_eq!(tile.fullness(), MAX_FULLNESS);
        let tile = Tile::new(TileCoord::new(0, 0), TileType::Bare, fixed(-5));
        assert_eq!(tile.fullness(), Fixed::ZERO);
    }

    #[test]
    fn test_claim_flips_owner_then_claims() {
        let mut tile = Tile::new(TileCoord::new(0, 0), TileType::Bare, fixed(0));
        let red = FactionId(1);
        let quarter = Fixed::from_num(0.25);

        tile.claim_for(red, quarter);
        assert_eq!(tile.owner(), Some(red));
        assert_eq!(tile.claim_progress(), quarter);

        for _ in 0..3 {
            tile.claim_for(red, quarter);
        }
        assert_eq!(tile.kind(), TileType::Claimed);
        assert_eq!(tile.claim_progress(), Fixed::ONE);
    }

    #[test]
    fn test_rival_claim_erodes_progress_first() {
        let red = FactionId(1);
        let blue = FactionId(2);
        let mut tile = Tile::new(TileCoord::new(0, 0), TileType::Bare, fixed(0));
        tile.claim_for(red, Fixed::from_num(0.5));

        tile.claim_for(blue, Fixed::from_num(0.25));
        assert_eq!(tile.owner(), Some(red));

        tile.claim_for(blue, Fixed::from_num(0.5));
        assert_eq!(tile.owner(), Some(blue));
        assert_eq!(tile.claim_progress(), Fixed::from_num(0.25));
    }

    #[test]
    fn test_direction_offsets_are_symmetric() {
        let origin = TileCoord::new(0, 0);
        for dir in Direction::ALL {
            assert_eq!(origin.step(dir).step(dir.opposite()), origin);
            assert!(origin.is_adjacent(origin.step(dir)));
        }
    }
}
