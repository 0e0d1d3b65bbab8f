//! Common test utilities: deterministic streams, a structural mirror of
//! the tree built from its extracted columns, and naive oracles for the
//! invariants the property tests check.

#![allow(dead_code)]

use cuttree::pointstore::PointStore;
use cuttree::tree::{RandomCutTree, TreeColumns};
use cuttree::RandomCutSource;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Initialize tracing for a test run. No-op unless RUST_LOG is set.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A tree plus its backing store and the live occurrence mirror the
/// oracles need.
pub struct Fixture {
    pub tree: RandomCutTree<RandomCutSource>,
    pub store: PointStore,

    /// Live occurrences in insertion order: `(sequence, point_index)`.
    pub occurrences: Vec<(u64, u32)>,
}

impl Fixture {
    pub fn new(dimensions: usize, capacity: usize, cache_fraction: f64, seed: u64) -> Self {
        let tree = RandomCutTree::builder()
            .dimensions(dimensions)
            .capacity(capacity)
            .bounding_box_cache_fraction(cache_fraction)
            .store_sequences_enabled(true)
            .center_of_mass_enabled(true)
            .random_seed(seed)
            .build()
            .unwrap();

        Self {
            tree,
            store: PointStore::new(dimensions, 4 * (capacity + 2)),
            occurrences: Vec::new(),
        }
    }

    pub fn insert(&mut self, point: &[f32], sequence: u64) {
        let point_index = self.store.add(point).unwrap();
        let leaf = self.tree.add_point(point_index, sequence, &self.store).unwrap();

        // Record the canonical index: a duplicate lands on an existing leaf.
        self.occurrences
            .push((sequence, (leaf - self.tree.capacity() - 1) as u32));
    }

    pub fn delete(&mut self, sequence: u64) {
        let position = self
            .occurrences
            .iter()
            .position(|&(seq, _)| seq == sequence)
            .expect("unknown sequence");
        let (_, point_index) = self.occurrences.remove(position);

        self.tree
            .delete_point(point_index, sequence, &self.store)
            .unwrap();
    }

    pub fn total_occurrences(&self) -> usize {
        self.occurrences.len()
    }
}

/// Continuous random points (duplicates almost surely absent).
pub fn continuous_stream(seed: u64, count: usize, dimensions: usize) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);

    (0..count)
        .map(|_| (0..dimensions).map(|_| rng.gen_range(-10.0..10.0)).collect())
        .collect()
}

/// Point-store indices of the leaves under `node`, read from extracted
/// columns.
pub fn leaves_under(columns: &TreeColumns, capacity: usize, node: usize, out: &mut Vec<u32>) {
    if node > capacity {
        out.push((node - capacity - 1) as u32);
        return;
    }

    assert!(node < capacity, "sentinel reached in a live tree");
    leaves_under(columns, capacity, columns.left_index[node] as usize, out);
    leaves_under(columns, capacity, columns.right_index[node] as usize, out);
}

/// Tight axis-aligned bounding box of a set of stored points.
pub fn tight_box(store: &PointStore, leaves: &[u32], dimensions: usize) -> (Vec<f32>, Vec<f32>) {
    use cuttree::pointstore::PointStoreView;

    let mut min = vec![f32::INFINITY; dimensions];
    let mut max = vec![f32::NEG_INFINITY; dimensions];

    for &leaf in leaves {
        let point = store.get(leaf);

        for k in 0..dimensions {
            min[k] = min[k].min(point[k]);
            max[k] = max[k].max(point[k]);
        }
    }

    (min, max)
}

/// Every reachable interior slot of an extracted tree.
pub fn interior_slots(columns: &TreeColumns, capacity: usize) -> Vec<usize> {
    let mut slots = Vec::new();
    let Some(root) = columns.root else {
        return slots;
    };

    if root >= capacity {
        return slots;
    }

    let mut pending = vec![root];

    while let Some(slot) = pending.pop() {
        slots.push(slot);

        for child in [
            columns.left_index[slot] as usize,
            columns.right_index[slot] as usize,
        ] {
            if child < capacity {
                pending.push(child);
            }
        }
    }

    slots
}
