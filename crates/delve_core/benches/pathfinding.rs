//! Pathfinding and turn benchmarks for delve_core.
//!
//! Run with: `cargo bench -p delve_core`

// Benchmark binaries don't need docs on macro-generated functions
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use delve_core::prelude::*;

/// Square map with a comb of rock walls, each open at alternating ends.
fn comb_grid(size: i32, reachability: bool) -> Grid {
    let mut grid = Grid::new(false);
    for x in 0..size {
        for y in 0..size {
            let wall = x % 4 == 2 && if (x / 4) % 2 == 0 { y != size - 1 } else { y != 0 };
            let kind = if wall { TileType::Rock } else { TileType::Bare };
            grid.insert_tile(Tile::new(TileCoord::new(x, y), kind, Fixed::ZERO))
                .expect("fresh coordinates");
        }
    }
    if reachability {
        grid.enable_reachability();
    }
    grid
}

pub fn find_path_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_path");
    for size in [32, 64, 128] {
        let grid = comb_grid(size, true);
        let goal = TileCoord::new(size - 1, size - 1);
        group.bench_with_input(BenchmarkId::from_parameter(size), &grid, |b, grid| {
            b.iter(|| {
                black_box(find_path(
                    grid,
                    TileCoord::new(0, 0),
                    goal,
                    Passability::Walkable,
                ))
            });
        });
    }
    group.finish();
}

pub fn path_exists_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("path_exists");
    let goal = TileCoord::new(63, 63);
    for (label, indexed) in [("indexed", true), ("search", false)] {
        let grid = comb_grid(64, indexed);
        group.bench_function(label, |b| {
            b.iter(|| {
                black_box(path_exists(
                    &grid,
                    TileCoord::new(0, 0),
                    goal,
                    Passability::Walkable,
                ))
            });
        });
    }
    group.finish();
}

pub fn cut_corners_benchmark(c: &mut Criterion) {
    let grid = comb_grid(64, true);
    let path = find_path(
        &grid,
        TileCoord::new(0, 0),
        TileCoord::new(63, 63),
        Passability::Walkable,
    );
    c.bench_function("cut_corners_64", |b| {
        b.iter(|| black_box(cut_corners(&grid, &path, Passability::Walkable)));
    });
}

pub fn recolor_benchmark(c: &mut Criterion) {
    let mut grid = comb_grid(128, true);
    let target = TileCoord::new(1, 1);
    c.bench_function("recolor_128", |b| {
        b.iter(|| {
            grid.set_fullness(target, Fixed::from_num(50));
            grid.set_fullness(target, Fixed::ZERO);
        });
    });
}

criterion_group!(
    benches,
    find_path_benchmark,
    path_exists_benchmark,
    cut_corners_benchmark,
    recolor_benchmark
);
criterion_main!(benches);
