//! The bundled demo data loads and plays out reproducibly.

use std::path::PathBuf;

use delve_headless::{load_world, run, Forager, RunConfig};

fn demo(turns: u64, workers: usize) -> RunConfig {
    let data = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data");
    RunConfig {
        map: data.join("cavern.ron"),
        catalog: Some(data.join("catalog.ron")),
        config: Some(data.join("sim.ron")),
        turns,
        workers: Some(workers),
        save: None,
    }
}

#[test]
fn test_demo_data_loads() {
    let world = load_world(&demo(0, 2)).unwrap();
    assert_eq!(world.grid().len(), 48);
    assert_eq!(world.agent_count(), 2);
    assert_eq!(world.structures().len(), 3);
    assert_eq!(world.config().worker_count, 2);
}

#[test]
fn test_single_worker_demo_is_reproducible() {
    let first = run(&demo(60, 1), &Forager).unwrap();
    let second = run(&demo(60, 1), &Forager).unwrap();
    assert_eq!(first.state_hash, second.state_hash);
    assert_eq!(first.factions, second.factions);
}

#[test]
fn test_portal_tops_up_the_colony() {
    let report = run(&demo(25, 2), &Forager).unwrap();
    assert_eq!(report.spawned, 2);
    assert_eq!(report.agents, 4);
    let home = &report.factions[0];
    assert_eq!(home.stats.agents, 4);
    assert!(home.stats.gold > 0);
}
