//! Whole-turn behaviour: scheduler, reclamation, queues and peers.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use delve_core::prelude::*;
use delve_test_utils::determinism::{
    find_first_divergence, run_parallel_worlds, run_turns, verify_snapshot_determinism,
    verify_world_determinism,
};
use delve_test_utils::fixtures::{c, test_catalog, HOME_FACTION};

// =============================================================================
// Setup helpers
// =============================================================================

const TUNNELS: &str = r#"(
    tiles: [
        (coord: (x: 0, y: 0), kind: Bare, fullness: 0),
        (coord: (x: 1, y: 0), kind: Bare, fullness: 429496729600),
        (coord: (x: 2, y: 0), kind: Bare, fullness: 429496729600),
        (coord: (x: 3, y: 0), kind: Resource, fullness: 429496729600),
        (coord: (x: 0, y: 1), kind: Rock, fullness: 429496729600),
        (coord: (x: 1, y: 1), kind: Rock, fullness: 429496729600),
        (coord: (x: 2, y: 1), kind: Rock, fullness: 429496729600),
        (coord: (x: 3, y: 1), kind: Rock, fullness: 429496729600),
        (coord: (x: 0, y: 2), kind: Claimed, fullness: 0, owner: Some(1), claim_progress: 4294967296),
        (coord: (x: 1, y: 2), kind: Bare, fullness: 429496729600),
        (coord: (x: 2, y: 2), kind: Bare, fullness: 429496729600),
        (coord: (x: 3, y: 2), kind: Bare, fullness: 0),
    ],
    agents: [
        (class: "imp", tile: (x: 0, y: 0), faction: Some(1)),
        (class: "imp", tile: (x: 0, y: 2), faction: Some(1)),
    ],
    structures: [
        (kind: Treasury(gold: 0), owner: 1, tiles: [(x: 0, y: 2)]),
    ],
    factions: [
        (id: 1, stats: (claimed_tiles: 1, gold: 0, mana: 0, agents: 2)),
    ],
)"#;

fn tunnels(workers: usize) -> World {
    let snapshot = MapSnapshot::from_ron_str(TUNNELS).unwrap();
    let config = SimConfig {
        worker_count: workers,
        ..SimConfig::default()
    };
    World::from_snapshot(&snapshot, config, test_catalog()).unwrap()
}

/// Tunnel east: dig the next tile if it is solid, otherwise step onto it.
fn tunneler(ctx: &mut TurnContext<'_>, agent: &mut Agent) {
    if agent.has_waypoints() {
        return;
    }
    let east = agent.tile().step(Direction::East);
    let solid = ctx
        .grid()
        .tile(east)
        .map(|tile| tile.passability() == Passability::Impassable);
    match solid {
        Some(true) => {
            let mined = ctx.dig(east, agent.stats().dig_rate).unwrap_or(Fixed::ZERO);
            if let Some(faction) = agent.faction() {
                ctx.deposit_gold(faction, mined.to_num::<u64>());
            }
        }
        Some(false) => agent.push_waypoint(east),
        None => {}
    }
}

// =============================================================================
// Turn mechanics
// =============================================================================

#[test]
fn test_tunnelers_reach_the_far_end() {
    let mut world = tunnels(2);
    run_turns(&mut world, &tunneler, 20);

    let positions: Vec<TileCoord> = world
        .agents()
        .handles()
        .iter()
        .map(|(_, handle)| handle.lock().unwrap().tile())
        .collect();
    assert_eq!(positions, vec![c(3, 0), c(3, 2)]);
    assert_eq!(world.turn(), 20);

    let gold = world.faction(HOME_FACTION).unwrap().gold;
    assert_eq!(gold, 500);
}

#[test]
fn test_dead_agent_waits_for_observer() {
    let mut world = tunnels(2);
    let victim = world.agents().ids()[0];
    let weak = Arc::downgrade(&world.agent(victim).unwrap());

    // An outside reader (renderer, network) holds turn 0.
    let observer = world.reclaimer().check_in(0);
    let kill_first = move |_ctx: &mut TurnContext<'_>, agent: &mut Agent| {
        if agent.id() == victim {
            agent.kill();
        }
    };

    let mut scheduler = TurnScheduler::new();
    let report = scheduler.tick(&mut world, &kill_first).unwrap();
    assert_eq!(report.reaped, vec![victim]);
    assert!(world.agent(victim).is_none());
    assert!(weak.upgrade().is_some());

    let reader = thread::spawn(move || drop(observer));
    reader.join().unwrap();

    let report = scheduler.tick(&mut world, &FollowWaypoints).unwrap();
    assert!(report.reclaim.retired.contains(&0));
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_flush_waits_for_renderer() {
    let mut world = tunnels(2);
    let queue = world.attach_visual_queue();

    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut seen = 0;
            while let Some(item) = queue.pop_timeout(Duration::from_millis(500)) {
                thread::sleep(Duration::from_millis(1));
                drop(item);
                seen += 1;
            }
            seen
        })
    };

    let mut scheduler = TurnScheduler::new();
    for _ in 0..5 {
        scheduler.tick(&mut world, &tunneler).unwrap();
    }
    queue.flush_and_wait();
    assert!(queue.is_empty());

    let seen = consumer.join().unwrap();
    assert!(seen > 0);

    // Nothing holds old turns any more.
    let report = scheduler.tick(&mut world, &FollowWaypoints).unwrap();
    assert_eq!(report.reclaim.pending, 0);
    assert_eq!(world.reclaimer().outstanding(0), None);
}

#[test]
fn test_peer_follows_host() {
    let snapshot = MapSnapshot::from_ron_str(TUNNELS).unwrap();
    let mut host = World::from_snapshot(&snapshot, SimConfig::default(), test_catalog())
        .unwrap()
        .with_role(PeerRole::Host {
            peers: vec![PeerId(7)],
        });
    let mut peer = World::from_snapshot(&snapshot, SimConfig::default(), test_catalog())
        .unwrap()
        .with_role(PeerRole::Peer);
    let notices = host.attach_peer_queue();
    let mut scheduler = TurnScheduler::new();

    for _ in 0..4 {
        scheduler.tick(&mut host, &tunneler).unwrap();
        assert!(matches!(
            scheduler.tick(&mut host, &tunneler),
            Err(TickError::AwaitingPeers { .. })
        ));

        let notice = notices.pop().unwrap();
        let PeerNotice::TurnAdvanced { turn, snapshot } = notice.event();
        peer.apply_authoritative(snapshot).unwrap();
        assert_eq!(peer.turn(), *turn);
        assert_eq!(peer.state_hash(), host.state_hash());
        assert!(host.barrier().acknowledge(PeerId(7), peer.turn()));
    }

    assert!(matches!(
        TurnScheduler::new().tick(&mut peer, &tunneler),
        Err(TickError::NotAuthoritative)
    ));
    let stale = host.snapshot();
    assert!(peer.apply_authoritative(&stale).is_err());
}

// =============================================================================
// Determinism
// =============================================================================

#[test]
fn test_single_worker_runs_are_identical() {
    verify_world_determinism(|| tunnels(1), &tunneler, 15).assert_deterministic();
    assert_eq!(find_first_divergence(|| tunnels(1), &tunneler, 15), None);
}

#[test]
fn test_parallel_worlds_agree() {
    let hashes = run_parallel_worlds(|| tunnels(2), &tunneler, 4, 15);
    assert!(hashes.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn test_snapshot_reload_preserves_hash() {
    assert!(verify_snapshot_determinism(|| tunnels(2), &tunneler, 7));
}

#[test]
fn test_claims_grow_from_home_tile() {
    let mut world = tunnels(1);
    world.bulk_edit(|grid| {
        grid.set_fullness(c(1, 2), Fixed::ZERO);
    });
    run_turns(&mut world, &FollowWaypoints, 25);
    let grid = world.grid();
    let tile = grid.tile(c(1, 2)).unwrap();
    assert_eq!(tile.kind(), TileType::Claimed);
    assert_eq!(tile.owner(), Some(HOME_FACTION));
    drop(grid);
    assert_eq!(world.faction(HOME_FACTION).unwrap().claimed_tiles, 2);
    assert!(world.faction(HOME_FACTION).unwrap().mana >= 50 * 25);
}
