//! Reference agent behaviour for headless runs.
//!
//! Foragers walk to the nearest visible resource seam, mine it, and bank the
//! proceeds in their faction's treasury. With nothing in sight they work on
//! claiming the tile they stand on.

use delve_core::agent::Agent;
use delve_core::grid::Grid;
use delve_core::scheduler::{AgentBehavior, TurnContext};
use delve_core::tile::{Passability, TileCoord, TileType};

/// Mines resource seams and claims floor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Forager;

/// True for resource tiles that still hold ore.
fn is_seam(grid: &Grid, coord: TileCoord) -> bool {
    grid.tile(coord).is_some_and(|tile| {
        tile.kind() == TileType::Resource && tile.passability() == Passability::Impassable
    })
}

/// Closest tile, by steps, from which a visible seam can be mined.
fn nearest_approach(grid: &Grid, agent: &Agent) -> Option<TileCoord> {
    let here = agent.tile();
    let movement = agent.movement();
    grid.visible_tiles(here, agent.stats().sight_radius)
        .into_iter()
        .filter(|&coord| is_seam(grid, coord))
        .flat_map(|seam| grid.neighbors(seam))
        .filter(|&coord| {
            grid.tile(coord)
                .is_some_and(|tile| movement.permits(tile.passability()))
        })
        .min_by_key(|&coord| (here.manhattan(coord), coord))
}

impl AgentBehavior for Forager {
    fn take_turn(&self, ctx: &mut TurnContext<'_>, agent: &mut Agent) {
        if agent.has_waypoints() {
            return;
        }
        let here = agent.tile();

        let (seam, approach) = {
            let grid = ctx.grid();
            let seam = grid
                .neighbors(here)
                .into_iter()
                .find(|&coord| is_seam(&grid, coord));
            let approach = match seam {
                Some(_) => None,
                None => nearest_approach(&grid, agent),
            };
            (seam, approach)
        };

        if let Some(seam) = seam {
            let mined = ctx.dig(seam, agent.stats().dig_rate).unwrap_or_default();
            if let Some(faction) = agent.faction() {
                ctx.deposit_gold(faction, mined.to_num::<u64>());
            }
            return;
        }

        if let Some(approach) = approach {
            let path = ctx.find_path(here, approach, agent.movement());
            if !path.is_empty() {
                agent.set_path(path);
                return;
            }
        }

        if let Some(faction) = agent.faction() {
            ctx.claim(here, faction);
        }
    }
}
