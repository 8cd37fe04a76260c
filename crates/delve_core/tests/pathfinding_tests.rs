//! Path finder and reachability checks against a breadth-first baseline.

use delve_core::faction::FactionId;
use delve_core::grid::Grid;
use delve_core::math::Fixed;
use delve_core::pathfinding::{cut_corners, find_path, line_of_sight, path_exists, path_is_clear};
use delve_core::tile::{Passability, TileCoord, TileType};
use delve_test_utils::baseline::{bfs_distance, is_valid_walk, walkable_component};
use delve_test_utils::determinism::strategies::{arb_coord, arb_grid, arb_tile_type};
use delve_test_utils::fixtures::{ascii_grid, c, fixed, fixed_f, open_grid};
use delve_test_utils::proptest::prelude::*;

fn indexed(mut grid: Grid) -> Grid {
    grid.enable_reachability();
    grid
}

/// A terrain edit applied while the index is live.
#[derive(Debug, Clone)]
enum Edit {
    SetType(TileCoord, TileType),
    SetFullness(TileCoord, Fixed),
    Dig(TileCoord, Fixed),
    Claim(TileCoord, FactionId, Fixed),
}

impl Edit {
    fn apply(&self, grid: &mut Grid) {
        match *self {
            Self::SetType(coord, kind) => {
                grid.set_type(coord, kind);
            }
            Self::SetFullness(coord, fullness) => {
                grid.set_fullness(coord, fullness);
            }
            Self::Dig(coord, amount) => {
                grid.dig(coord, amount);
            }
            Self::Claim(coord, faction, rate) => {
                grid.claim_for(coord, faction, rate);
            }
        }
    }
}

fn arb_edit(side: i32) -> impl Strategy<Value = Edit> {
    let fullness = prop_oneof![
        Just(Fixed::ZERO),
        Just(fixed_f(0.05)),
        Just(fixed_f(0.5)),
        Just(fixed(100)),
    ];
    let rate = prop_oneof![Just(fixed_f(0.5)), Just(Fixed::ONE)];
    prop_oneof![
        (arb_coord(side), arb_tile_type()).prop_map(|(coord, kind)| Edit::SetType(coord, kind)),
        (arb_coord(side), fullness).prop_map(|(coord, f)| Edit::SetFullness(coord, f)),
        (arb_coord(side), 1..120i32).prop_map(|(coord, n)| Edit::Dig(coord, fixed(n))),
        (arb_coord(side), 1..3u32, rate)
            .prop_map(|(coord, faction, rate)| Edit::Claim(coord, FactionId(faction), rate)),
    ]
}

// =============================================================================
// Concrete scenarios
// =============================================================================

#[test]
fn test_open_grid_corner_to_corner() {
    let grid = open_grid(5, 5);
    let path = find_path(&grid, c(0, 0), c(4, 4), Passability::Walkable);
    assert_eq!(path.len(), 9);
    assert!(is_valid_walk(&grid, &path, c(0, 0), c(4, 4), Passability::Walkable));

    let cut = cut_corners(&grid, &path, Passability::Walkable);
    assert!(cut.len() < path.len());
    assert_eq!(cut.first(), Some(&c(0, 0)));
    assert_eq!(cut.last(), Some(&c(4, 4)));
}

#[test]
fn test_detour_around_center_block() {
    let mut grid = open_grid(5, 5);
    grid.set_fullness(c(2, 2), fixed(100));
    assert!(path_exists(&grid, c(0, 0), c(4, 4), Passability::Walkable));

    let path = find_path(&grid, c(0, 0), c(4, 4), Passability::Walkable);
    assert!(path.len() >= 9);
    assert!(!path.contains(&c(2, 2)));
    assert!(is_valid_walk(&grid, &path, c(0, 0), c(4, 4), Passability::Walkable));
}

#[test]
fn test_disjoint_regions() {
    let grid = ascii_grid(&["..#..", "..#..", "..#.."], true);
    let left = grid.tile(c(0, 0)).unwrap();
    let right = grid.tile(c(4, 0)).unwrap();
    assert!(left.reach_color().is_some());
    assert_ne!(left.reach_color(), right.reach_color());
    assert_eq!(grid.reachability().regions(), 2);

    assert!(!path_exists(&grid, c(0, 0), c(4, 0), Passability::Walkable));
    assert!(find_path(&grid, c(0, 0), c(4, 0), Passability::Walkable).is_empty());
}

#[test]
fn test_flier_crosses_lava_walker_does_not() {
    let grid = ascii_grid(&[".~."], true);
    assert!(!path_exists(&grid, c(0, 0), c(2, 0), Passability::Walkable));
    assert_eq!(
        find_path(&grid, c(0, 0), c(2, 0), Passability::Flyable),
        vec![c(0, 0), c(1, 0), c(2, 0)]
    );
}

#[test]
fn test_digging_joins_regions() {
    let mut grid = ascii_grid(&[".%."], true);
    assert!(!path_exists(&grid, c(0, 0), c(2, 0), Passability::Walkable));
    grid.dig(c(1, 0), fixed(100));
    assert!(path_exists(&grid, c(0, 0), c(2, 0), Passability::Walkable));
    assert_eq!(grid.reachability().regions(), 1);
}

#[test]
fn test_corner_cut_never_slips_between_diagonal_rocks() {
    let grid = ascii_grid(&["..", ".#", "#."], true);
    // (0,0) is rock, (1,1) is rock: a straight line from (0,1) to (1,0)
    // would pass between them.
    let cells = line_of_sight(c(0, 1), c(1, 0));
    assert!(!path_is_clear(&grid, &cells, Passability::Walkable));
}

// =============================================================================
// Property-based tests using proptest
// =============================================================================

proptest! {
    /// A* finds a shortest valid walk whenever breadth-first search does.
    #[test]
    fn prop_astar_matches_bfs(
        grid in arb_grid(8),
        start in arb_coord(8),
        goal in arb_coord(8),
        flyer in any::<bool>(),
    ) {
        let class = if flyer { Passability::Flyable } else { Passability::Walkable };
        let grid = indexed(grid);
        let path = find_path(&grid, start, goal, class);
        match bfs_distance(&grid, start, goal, class) {
            Some(steps) => {
                prop_assert_eq!(path.len(), steps + 1);
                prop_assert!(is_valid_walk(&grid, &path, start, goal, class));
            }
            None => prop_assert!(path.is_empty()),
        }
    }

    /// Shared colour and walkable path existence agree in both directions.
    #[test]
    fn prop_colors_agree_with_search(
        grid in arb_grid(8),
        start in arb_coord(8),
        goal in arb_coord(8),
    ) {
        let grid = indexed(grid);
        let indexed_answer = path_exists(&grid, start, goal, Passability::Walkable);
        let reachable = walkable_component(&grid, start).contains(&goal);
        prop_assert_eq!(indexed_answer, reachable);
        prop_assert_eq!(grid.same_region(start, goal).unwrap_or(false), reachable);

        let mut unindexed = grid.clone();
        unindexed.disable_reachability();
        prop_assert_eq!(path_exists(&unindexed, start, goal, Passability::Walkable), reachable);
    }

    /// Colours stay in step with search after any sequence of live edits.
    #[test]
    fn prop_colors_survive_edits(
        grid in arb_grid(6),
        edits in prop::collection::vec(arb_edit(6), 1..24),
        start in arb_coord(6),
    ) {
        let mut grid = indexed(grid);
        for edit in &edits {
            edit.apply(&mut grid);
        }

        let component = walkable_component(&grid, start);
        let coords: Vec<TileCoord> = grid.iter().map(|tile| tile.coord()).collect();
        for goal in coords {
            let reachable = component.contains(&goal);
            prop_assert_eq!(grid.same_region(start, goal), Some(reachable), "goal {:?}", goal);
            prop_assert_eq!(path_exists(&grid, start, goal, Passability::Walkable), reachable);
            prop_assert_eq!(
                find_path(&grid, start, goal, Passability::Walkable).is_empty(),
                !reachable
            );
        }
    }

    /// Corner cutting keeps endpoints and every segment stays clear.
    #[test]
    fn prop_corner_cut_segments_are_clear(
        grid in arb_grid(8),
        start in arb_coord(8),
        goal in arb_coord(8),
    ) {
        let grid = indexed(grid);
        let path = find_path(&grid, start, goal, Passability::Walkable);
        let cut = cut_corners(&grid, &path, Passability::Walkable);
        prop_assert!(cut.len() <= path.len());
        prop_assert_eq!(cut.first(), path.first());
        prop_assert_eq!(cut.last(), path.last());
        for pair in cut.windows(2) {
            let cells = line_of_sight(pair[0], pair[1]);
            prop_assert!(path_is_clear(&grid, &cells, Passability::Walkable));
        }
    }

    /// Repeated queries on an unchanged grid return the same path.
    #[test]
    fn prop_find_path_is_idempotent(
        grid in arb_grid(8),
        start in arb_coord(8),
        goal in arb_coord(8),
    ) {
        let grid = indexed(grid);
        let first = find_path(&grid, start, goal, Passability::Walkable);
        let second = find_path(&grid, start, goal, Passability::Walkable);
        prop_assert_eq!(first, second);
    }

    /// Thickened lines are 4-connected and keep their endpoints.
    #[test]
    fn prop_line_of_sight_is_four_connected(
        a in (-20i32..20, -20i32..20),
        b in (-20i32..20, -20i32..20),
    ) {
        let (a, b) = (TileCoord::from(a), TileCoord::from(b));
        let cells = line_of_sight(a, b);
        prop_assert_eq!(cells.first(), Some(&a));
        prop_assert_eq!(cells.last(), Some(&b));
        for (i, cell) in cells.iter().enumerate().skip(1) {
            prop_assert!(cells[..i].iter().any(|earlier| earlier.is_adjacent(*cell)));
        }
    }
}
