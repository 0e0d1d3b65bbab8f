//! Tests for the generic visitor descent and parent tracking.

#![expect(clippy::unwrap_used, reason = "fail fast in tests")]

mod common;

use common::{continuous_stream, interior_slots, Fixture};
use cuttree::tree::RandomCutTree;
use cuttree::pointstore::PointStore;
use cuttree::visitor::{MultiVisitor, NodeView, Visitor};

/// Records the callback order and sanity of the view at each step.
#[derive(Default)]
struct DepthRecorder {
    leaf_depth: Option<usize>,
    interior_depths: Vec<usize>,
    leaf_point: Vec<f32>,
}

impl Visitor for DepthRecorder {
    fn accept(&mut self, view: &NodeView, depth: usize) {
        assert!(view.probability_of_cut() >= 0.0 && view.probability_of_cut() <= 1.0);
        assert!(view.sibling_box().is_some());
        self.interior_depths.push(depth);
    }

    fn accept_leaf(&mut self, view: &NodeView, depth: usize) {
        self.leaf_depth = Some(depth);
        self.leaf_point = view.leaf_point().to_vec();
    }
}

#[test]
fn single_visitor_walks_leaf_then_ancestors() {
    let mut fixture = Fixture::new(2, 16, 1.0, 41);

    for (i, point) in continuous_stream(8, 12, 2).iter().enumerate() {
        fixture.insert(point, i as u64);
    }

    for query in continuous_stream(9, 5, 2) {
        let path = fixture.tree.get_path(&query).unwrap();
        let mut recorder = DepthRecorder::default();

        fixture
            .tree
            .traverse(&query, &fixture.store, &mut recorder)
            .unwrap();

        // The leaf is visited first, at the bottom of the descent path.
        assert_eq!(recorder.leaf_depth, Some(path.len() - 1));

        // Then every interior ancestor, bottom-up.
        let expected: Vec<usize> = (0..path.len() - 1).rev().collect();
        assert_eq!(recorder.interior_depths, expected);

        // The leaf the traversal reports is the one the path ends at.
        let (leaf, _) = *path.last().unwrap();
        let point_index = (leaf - fixture.tree.capacity() - 1) as u32;
        use cuttree::pointstore::PointStoreView;
        assert_eq!(recorder.leaf_point, fixture.store.get(point_index));
    }
}

/// Counts distinct leaves; with an always-true trigger the multi descent
/// must reach every leaf exactly once.
#[derive(Default, Clone)]
struct LeafCounter {
    leaves: usize,
}

impl Visitor for LeafCounter {
    fn accept(&mut self, _view: &NodeView, _depth: usize) {}

    fn accept_leaf(&mut self, _view: &NodeView, _depth: usize) {
        self.leaves += 1;
    }
}

impl MultiVisitor for LeafCounter {
    fn trigger(&self, _view: &NodeView) -> bool {
        true
    }

    fn new_copy(&self) -> Self {
        Self::default()
    }

    fn combine(&mut self, other: Self) {
        self.leaves += other.leaves;
    }
}

#[test]
fn multi_visitor_with_open_trigger_reaches_every_leaf() {
    let mut fixture = Fixture::new(2, 32, 1.0, 43);

    for (i, point) in continuous_stream(10, 20, 2).iter().enumerate() {
        fixture.insert(point, i as u64);
    }

    let mut leaves = Vec::new();
    common::leaves_under(
        &fixture.tree.columns(),
        fixture.tree.capacity(),
        fixture.tree.root().unwrap(),
        &mut leaves,
    );

    let mut counter = LeafCounter::default();
    fixture
        .tree
        .traverse_multi(&[0.0, 0.0], &fixture.store, &mut counter)
        .unwrap();

    assert_eq!(counter.leaves, leaves.len());
}

#[test]
fn parent_tracking_mirrors_the_columns() {
    let mut tree = RandomCutTree::builder()
        .dimensions(2)
        .capacity(32)
        .store_parent(true)
        .random_seed(47)
        .build()
        .unwrap();
    let mut store = PointStore::new(2, 256);

    for (i, point) in continuous_stream(12, 48, 2).iter().enumerate() {
        let index = store.add(point).unwrap();

        tree.update(index, i as u64, &store).unwrap();
    }

    let columns = tree.columns();
    let capacity = tree.capacity();
    let root = columns.root.unwrap();

    assert_eq!(tree.parent_of(root).unwrap(), None);

    for slot in interior_slots(&columns, capacity) {
        for child in [
            columns.left_index[slot] as usize,
            columns.right_index[slot] as usize,
        ] {
            if child < capacity {
                assert_eq!(tree.parent_of(child).unwrap(), Some(slot));
            }
        }
    }

    // Parent tracking survives deletions and the slot churn they cause.
    for sequence in 28..38_u64 {
        let point = continuous_stream(12, 48, 2)[sequence as usize].clone();
        let index = store.add(&point).unwrap();

        tree.delete_point(index, sequence, &store).unwrap();
    }

    let columns = tree.columns();

    for slot in interior_slots(&columns, capacity) {
        for child in [
            columns.left_index[slot] as usize,
            columns.right_index[slot] as usize,
        ] {
            if child < capacity {
                assert_eq!(tree.parent_of(child).unwrap(), Some(slot));
            }
        }
    }
}
