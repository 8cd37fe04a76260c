//! Test fixtures and helpers.
//!
//! Grids are drawn as ASCII rows, top row first:
//!
//! | char | tile                          |
//! |------|-------------------------------|
//! | `.`  | bare floor                    |
//! | `#`  | rock                          |
//! | `~`  | lava (fliers only)            |
//! | `$`  | resource seam, full           |
//! | `C`  | claimed floor of faction 1    |
//! | `%`  | bare but undug (impassable)   |
//! | ` `  | no tile                       |
//!
//! Row `0` of the drawing is the highest `y`, so the bottom-left character
//! sits at `(0, 0)`.

use delve_core::catalog::{AgentCatalog, AgentClass};
use delve_core::faction::FactionId;
use delve_core::grid::Grid;
use delve_core::math::Fixed;
use delve_core::tile::{Passability, Tile, TileCoord, TileType, MAX_FULLNESS};
use fixed::types::I32F32;

/// Faction that owns `C` tiles.
pub const HOME_FACTION: FactionId = FactionId(1);

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
///
/// Note: In real simulation code, never use floats.
/// This is only for convenient test setup.
#[must_use]
pub fn fixed_f(n: f64) -> I32F32 {
    I32F32::from_num(n)
}

/// Shorthand for a coordinate.
#[must_use]
pub const fn c(x: i32, y: i32) -> TileCoord {
    TileCoord::new(x, y)
}

/// Tile for one ASCII character, or `None` for a hole.
///
/// # Panics
///
/// Panics on characters outside the legend.
#[must_use]
pub fn tile_for(ch: char, coord: TileCoord) -> Option<Tile> {
    let tile = match ch {
        '.' => Tile::new(coord, TileType::Bare, Fixed::ZERO),
        '#' => Tile::new(coord, TileType::Rock, MAX_FULLNESS),
        '~' => Tile::new(coord, TileType::Lava, Fixed::ZERO),
        '$' => Tile::new(coord, TileType::Resource, MAX_FULLNESS),
        '%' => Tile::new(coord, TileType::Bare, MAX_FULLNESS),
        'C' => Tile::new(coord, TileType::Claimed, Fixed::ZERO).with_owner(Some(HOME_FACTION)),
        ' ' => return None,
        other => panic!("unknown grid character {other:?}"),
    };
    Some(tile)
}

/// Build a grid from ASCII rows.
///
/// # Panics
///
/// Panics on characters outside the legend.
#[must_use]
pub fn ascii_grid(rows: &[&str], reachability: bool) -> Grid {
    let mut grid = Grid::new(false);
    let height = i32::try_from(rows.len()).expect("grid height fits i32");
    for (row, line) in rows.iter().enumerate() {
        let y = height - 1 - i32::try_from(row).expect("row fits i32");
        for (x, ch) in line.chars().enumerate() {
            let coord = c(i32::try_from(x).expect("column fits i32"), y);
            if let Some(tile) = tile_for(ch, coord) {
                grid.insert_tile(tile).expect("each coordinate appears once");
            }
        }
    }
    if reachability {
        grid.enable_reachability();
    }
    grid
}

/// A `width` by `height` grid of bare floor with the index enabled.
#[must_use]
pub fn open_grid(width: i32, height: i32) -> Grid {
    let mut grid = Grid::new(false);
    for x in 0..width {
        for y in 0..height {
            grid.insert_tile(Tile::new(c(x, y), TileType::Bare, Fixed::ZERO))
                .expect("fresh coordinates");
        }
    }
    grid.enable_reachability();
    grid
}

/// A walking digger class.
#[must_use]
pub fn imp_class() -> AgentClass {
    AgentClass {
        name: "imp".into(),
        health: fixed(10),
        speed: fixed(1),
        dig_rate: fixed(20),
        sight_radius: fixed(6),
        movement: Passability::Walkable,
    }
}

/// A fast flying class with no digging.
#[must_use]
pub fn bat_class() -> AgentClass {
    AgentClass {
        name: "bat".into(),
        health: fixed(4),
        speed: fixed(2),
        dig_rate: Fixed::ZERO,
        sight_radius: fixed(8),
        movement: Passability::Flyable,
    }
}

/// Catalog holding [`imp_class`] and [`bat_class`].
#[must_use]
pub fn test_catalog() -> AgentCatalog {
    let mut catalog = AgentCatalog::new();
    catalog.insert(imp_class()).expect("imp is valid");
    catalog.insert(bat_class()).expect("bat is valid");
    catalog
}
