//! End-to-end benchmarks for the sliding-window update loop and scoring.
//!
//! Run with: `cargo bench --bench update_score`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cuttree::pointstore::PointStore;
use cuttree::scoring;
use cuttree::tree::RandomCutTree;

const DIMENSIONS: usize = 8;
const CAPACITY: usize = 255;

fn stream(seed: u64, count: usize) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);

    (0..count)
        .map(|_| (0..DIMENSIONS).map(|_| rng.gen_range(-10.0..10.0)).collect())
        .collect()
}

fn warmed_tree(cache_fraction: f64) -> (RandomCutTree, PointStore) {
    let mut tree = RandomCutTree::builder()
        .dimensions(DIMENSIONS)
        .capacity(CAPACITY)
        .bounding_box_cache_fraction(cache_fraction)
        .random_seed(1)
        .build()
        .unwrap();
    let mut store = PointStore::new(DIMENSIONS, 4096);

    for (i, point) in stream(2, CAPACITY).iter().enumerate() {
        let index = store.add(point).unwrap();

        tree.update(index, i as u64, &store).unwrap();
    }

    (tree, store)
}

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update");

    for fraction in [0.0, 1.0] {
        group.bench_with_input(
            BenchmarkId::from_parameter(fraction),
            &fraction,
            |b, &fraction| {
                let (mut tree, mut store) = warmed_tree(fraction);
                let points = stream(3, 1024);
                let mut sequence = CAPACITY as u64;

                b.iter(|| {
                    let point = &points[(sequence as usize) % points.len()];
                    let index = store.add(point).unwrap();
                    let result = tree.update(index, sequence, &store).unwrap();

                    sequence += 1;
                    black_box(result);
                });
            },
        );
    }

    group.finish();
}

fn bench_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("score");

    for fraction in [0.0, 1.0] {
        group.bench_with_input(
            BenchmarkId::from_parameter(fraction),
            &fraction,
            |b, &fraction| {
                let (mut tree, store) = warmed_tree(fraction);
                let queries = stream(4, 256);
                let mut i = 0_usize;

                b.iter(|| {
                    let score =
                        scoring::anomaly_score(&mut tree, &store, &queries[i % queries.len()])
                            .unwrap();

                    i += 1;
                    black_box(score);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_update, bench_score);
criterion_main!(benches);
