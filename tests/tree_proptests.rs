//! Property-based tests for the tree invariants.
//!
//! Streams of inserts and deletes on a small integer grid (so duplicates
//! occur) are driven through a tree, and the resulting structure is
//! checked against naive oracles computed from the extracted columns:
//! box tightness, mass consistency, cut respect, round-trip
//! reconstruction, insert/delete idempotence, score range, and cache
//! equivalence.

#![expect(clippy::unwrap_used, reason = "fail fast in tests")]

mod common;

use common::{interior_slots, leaves_under, tight_box, Fixture};
use cuttree::pointstore::PointStoreView;
use cuttree::scoring;
use cuttree::tree::RandomCutTree;
use proptest::prelude::*;

// ============================================================================
//  Strategies
// ============================================================================

/// A point on a small integer grid.
fn grid_point(dimensions: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec((-5_i32..=5).prop_map(|v| v as f32), dimensions)
}

/// A stream of points to insert in order.
fn point_stream(dimensions: usize, max_len: usize) -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(grid_point(dimensions), 1..=max_len)
}

/// Indices of occurrences to delete afterwards, as fractions of the
/// stream length.
fn delete_mask(max_len: usize) -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), max_len)
}

fn build_fixture(points: &[Vec<f32>], deletes: &[bool], cache_fraction: f64) -> Fixture {
    let dimensions = points[0].len();
    let mut fixture = Fixture::new(dimensions, 64, cache_fraction, 271_828);

    for (i, point) in points.iter().enumerate() {
        fixture.insert(point, i as u64);
    }

    // Delete a masked subset, oldest first, never emptying the tree.
    let sequences: Vec<u64> = fixture.occurrences.iter().map(|&(seq, _)| seq).collect();

    for (i, sequence) in sequences.iter().enumerate() {
        if fixture.total_occurrences() <= 1 {
            break;
        }

        if deletes.get(i).copied().unwrap_or(false) {
            fixture.delete(*sequence);
        }
    }

    fixture
}

// ============================================================================
//  Structural invariants
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every cached interior box is the tight box of the leaves below it.
    #[test]
    fn boxes_stay_tight(
        points in point_stream(2, 40),
        deletes in delete_mask(40),
    ) {
        let mut fixture = build_fixture(&points, &deletes, 1.0);
        let columns = fixture.tree.columns();
        let capacity = fixture.tree.capacity();

        for slot in interior_slots(&columns, capacity) {
            let mut leaves = Vec::new();
            leaves_under(&columns, capacity, slot, &mut leaves);

            let (min, max) = tight_box(&fixture.store, &leaves, 2);
            let stored = fixture.tree.bounding_box(slot, &fixture.store).unwrap();

            prop_assert_eq!(stored.min_values(), &min[..]);
            prop_assert_eq!(stored.max_values(), &max[..]);
        }
    }

    /// Root mass equals total occurrences equals the sum of leaf masses.
    #[test]
    fn mass_is_consistent(
        points in point_stream(3, 40),
        deletes in delete_mask(40),
    ) {
        let fixture = build_fixture(&points, &deletes, 0.5);

        prop_assert_eq!(fixture.tree.mass(), fixture.total_occurrences());

        let columns = fixture.tree.columns();
        let capacity = fixture.tree.capacity();
        let mut leaves = Vec::new();

        if let Some(root) = columns.root {
            leaves_under(&columns, capacity, root, &mut leaves);
        }

        let leaf_mass_total: usize = leaves
            .iter()
            .map(|&p| fixture.tree.get_leaf_mass(fixture.tree.leaf_index(p)))
            .sum();

        prop_assert_eq!(leaf_mass_total, fixture.total_occurrences());
    }

    /// Left subtrees respect `<=`, right subtrees respect `>` on the cut.
    #[test]
    fn cuts_partition_their_subtrees(
        points in point_stream(2, 40),
        deletes in delete_mask(40),
    ) {
        let fixture = build_fixture(&points, &deletes, 1.0);
        let columns = fixture.tree.columns();
        let capacity = fixture.tree.capacity();

        for slot in interior_slots(&columns, capacity) {
            let dim = columns.cut_dimension[slot] as usize;
            let value = columns.cut_values[slot];

            let mut left_leaves = Vec::new();
            leaves_under(&columns, capacity, columns.left_index[slot] as usize, &mut left_leaves);

            for leaf in left_leaves {
                prop_assert!(fixture.store.get(leaf)[dim] <= value);
            }

            let mut right_leaves = Vec::new();
            leaves_under(&columns, capacity, columns.right_index[slot] as usize, &mut right_leaves);

            for leaf in right_leaves {
                prop_assert!(fixture.store.get(leaf)[dim] > value);
            }
        }
    }
}

// ============================================================================
//  Round-trip and idempotence
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Extract columns, rebuild, replay the occurrences: identical scores.
    #[test]
    fn column_round_trip_preserves_scores(
        points in point_stream(2, 32),
        queries in prop::collection::vec(grid_point(2), 4),
    ) {
        let mut fixture = build_fixture(&points, &[], 1.0);
        let columns = fixture.tree.columns();

        let mut rebuilt = RandomCutTree::builder()
            .dimensions(2)
            .capacity(64)
            .store_sequences_enabled(true)
            .columns(columns)
            .build()
            .unwrap();

        for &(sequence, point_index) in &fixture.occurrences {
            rebuilt
                .add_to_partial_tree(point_index, sequence, &fixture.store)
                .unwrap();
        }

        prop_assert_eq!(rebuilt.mass(), fixture.tree.mass());
        prop_assert_eq!(rebuilt.size(), fixture.tree.size());

        for query in &queries {
            let original = scoring::anomaly_score(&mut fixture.tree, &fixture.store, query).unwrap();
            let replayed = scoring::anomaly_score(&mut rebuilt, &fixture.store, query).unwrap();

            prop_assert!((original - replayed).abs() < 1e-9, "{} vs {}", original, replayed);
        }
    }

    /// Inserting then deleting the same occurrence restores the arena.
    #[test]
    fn insert_then_delete_is_identity(
        points in point_stream(2, 24),
        extra in grid_point(2),
    ) {
        let mut fixture = build_fixture(&points, &[], 1.0);

        let before_columns = fixture.tree.columns();
        let before_size = fixture.tree.size();
        let before_mass = fixture.tree.mass();
        let root = fixture.tree.root().unwrap();
        let before_sum = fixture.tree.point_sum(root, &fixture.store).unwrap();

        let sequence = 1_000_000;
        fixture.insert(&extra, sequence);
        fixture.delete(sequence);

        let after_columns = fixture.tree.columns();

        prop_assert_eq!(before_columns.left_index, after_columns.left_index);
        prop_assert_eq!(before_columns.right_index, after_columns.right_index);
        prop_assert_eq!(before_columns.cut_dimension, after_columns.cut_dimension);
        prop_assert_eq!(before_columns.cut_values, after_columns.cut_values);
        prop_assert_eq!(before_columns.root, after_columns.root);
        prop_assert_eq!(fixture.tree.size(), before_size);
        prop_assert_eq!(fixture.tree.mass(), before_mass);

        let root = fixture.tree.root().unwrap();
        let after_sum = fixture.tree.point_sum(root, &fixture.store).unwrap();
        prop_assert_eq!(before_sum, after_sum);
    }
}

// ============================================================================
//  Scoring invariants
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Scores are non-negative, and zero only for damped duplicates.
    #[test]
    fn scores_are_non_negative(
        points in point_stream(2, 32),
        query in grid_point(2),
    ) {
        let mut fixture = build_fixture(&points, &[], 1.0);
        let score = scoring::anomaly_score(&mut fixture.tree, &fixture.store, &query).unwrap();

        prop_assert!(score >= 0.0);

        let is_duplicate = fixture
            .occurrences
            .iter()
            .any(|&(_, p)| fixture.store.get(p) == query.as_slice());

        if !is_duplicate {
            prop_assert!(score > 0.0);
        }
    }

    /// The cache fraction changes memory traffic, not scores.
    #[test]
    fn cache_fraction_does_not_change_scores(
        points in point_stream(2, 32),
        queries in prop::collection::vec(grid_point(2), 4),
    ) {
        let fractions = [0.0, 0.25, 0.5, 1.0];
        let mut fixtures: Vec<Fixture> = fractions
            .iter()
            .map(|&fraction| build_fixture(&points, &[], fraction))
            .collect();

        for query in &queries {
            let reference = {
                let first = &mut fixtures[0];

                scoring::anomaly_score(&mut first.tree, &first.store, query).unwrap()
            };

            for fixture in &mut fixtures[1..] {
                let score = scoring::anomaly_score(&mut fixture.tree, &fixture.store, query).unwrap();

                prop_assert!(
                    (score - reference).abs() < 1e-6,
                    "fraction mismatch: {} vs {}",
                    score,
                    reference
                );
            }
        }
    }
}
