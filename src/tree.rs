//! Filepath: src/tree.rs
//!
//! `RandomCutTree` - one streaming random-cut tree over a point store.
//!
//! The tree is a thin facade over [`NodeStore`]: it owns the root, the
//! cut-drawing policy, and the sliding occurrence window, and forwards
//! everything else. Construction goes through [`TreeBuilder`], which picks
//! one of three width-specialized layouts:
//!
//! - Small (`u8` cells): `capacity < 256` and `dimensions <= 256`
//! - Medium (`u16` cells): `capacity < 65_535` and `dimensions <= 65_535`
//! - Large (`u32` cells): everything else
//!
//! All mutations and queries on one tree must be serialized by the caller;
//! there is no internal locking. Queries may still write: lazy cache
//! population during scoring mutates the box cache, which is why scoring
//! takes `&mut self`.

use std::collections::BTreeMap;
use std::fmt as StdFmt;

use crate::boundingbox::BoundingBox;
use crate::cut::{CutSource, RandomCutSource};
use crate::nodestore::{NodeStore, SWITCH_FRACTION};
use crate::pointstore::PointStoreView;
use crate::visitor::{self, MultiVisitor, NodeView, Visitor};
use crate::width::IndexWidth;

mod update;

// ============================================================================
//  TreeError
// ============================================================================

/// Errors signaled by tree operations.
///
/// `StoreFull` is the only error a caller is expected to act on (evict,
/// then retry the insert). The other variants are contract violations:
/// the tree's caches may be inconsistent afterwards and the tree must be
/// discarded. A cache miss is never an error; it falls back to
/// reconstruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The free-slot manager is exhausted.
    StoreFull,

    /// A leaf or sequence index expected to be present was not found.
    MissingLeaf,

    /// The caller broke a precondition; the tree is no longer usable.
    ContractViolation(&'static str),
}

impl StdFmt::Display for TreeError {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        match self {
            Self::StoreFull => write!(f, "interior node store is full"),

            Self::MissingLeaf => write!(f, "leaf or sequence not found in tree"),

            Self::ContractViolation(message) => write!(f, "contract violation: {message}"),
        }
    }
}

impl std::error::Error for TreeError {}

// ============================================================================
//  UpdateResult
// ============================================================================

/// Outcome of one sliding-window update: the inserted leaf and, when the
/// window was full, the evicted one. Point indices are the canonical
/// indices the tree references, which the coordinator uses for reference
/// counting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    pub inserted_leaf: usize,
    pub inserted_point: u32,
    pub evicted_leaf: Option<usize>,
    pub evicted_point: Option<u32>,
}

// ============================================================================
//  TreeCore
// ============================================================================

/// One width-specialized tree: node store, root, cut policy, and the
/// occurrence window ordered by sequence index.
#[derive(Debug)]
pub struct TreeCore<C: IndexWidth, D: IndexWidth, S: CutSource> {
    store: NodeStore<C, D>,
    root: Option<usize>,
    cut_source: S,

    /// Live occurrences, sequence index -> point index; the smallest key
    /// is the eviction candidate.
    window: BTreeMap<u64, u32>,
}

impl<C: IndexWidth, D: IndexWidth, S: CutSource> TreeCore<C, D, S> {
    fn new(store: NodeStore<C, D>, cut_source: S, root: Option<usize>) -> Self {
        Self {
            store,
            root,
            cut_source,
            window: BTreeMap::new(),
        }
    }

    /// Number of interior nodes in use.
    #[must_use]
    pub fn size(&self) -> usize {
        self.store.size()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.store.dimensions()
    }

    /// Total leaf occurrences in the tree.
    #[must_use]
    pub fn mass(&self) -> usize {
        self.root.map_or(0, |root| self.store.get_mass(root))
    }

    #[must_use]
    pub fn root(&self) -> Option<usize> {
        self.root
    }

    #[must_use]
    pub fn is_leaf(&self, index: usize) -> bool {
        self.store.is_leaf(index)
    }

    #[must_use]
    pub fn is_internal(&self, index: usize) -> bool {
        self.store.is_internal(index)
    }

    /// Composite leaf index for a point-store index.
    #[must_use]
    pub fn leaf_index(&self, point_index: u32) -> usize {
        self.store.leaf_index(point_index)
    }

    /// Duplicate count of a leaf.
    #[must_use]
    pub fn get_leaf_mass(&self, leaf: usize) -> usize {
        self.store.get_leaf_mass(leaf)
    }

    #[must_use]
    pub fn cache_fraction(&self) -> f64 {
        self.store.cache_fraction()
    }

    /// Reallocate the bounding-box cache. Must not be called while a
    /// traversal is in flight (the borrow checker enforces as much).
    pub fn resize_cache(&mut self, fraction: f64) -> Result<(), TreeError> {
        self.store.resize_cache(fraction)
    }

    /// Bounding box of the subtree under any index.
    pub fn bounding_box<P: PointStoreView>(
        &mut self,
        index: usize,
        store: &P,
    ) -> Result<BoundingBox, TreeError> {
        self.store.get_box(index, store)
    }

    /// Subtree point sum, when center of mass is enabled.
    pub fn point_sum<P: PointStoreView>(
        &mut self,
        index: usize,
        store: &P,
    ) -> Result<Vec<f32>, TreeError> {
        self.store.get_point_sum(index, store)
    }

    /// Anomaly score of `point` under the supplied scalar policies.
    pub fn score<P, F1, F2, F3>(
        &mut self,
        point: &[f32],
        ignore_mass: usize,
        store: &P,
        score_seen: F1,
        score_unseen: F2,
        tree_damp: F3,
    ) -> Result<f64, TreeError>
    where
        P: PointStoreView,
        F1: Fn(f64, f64) -> f64,
        F2: Fn(f64, f64) -> f64,
        F3: Fn(f64) -> f64,
    {
        self.check_point(point, store)?;
        self.store.dynamic_score(
            self.root,
            ignore_mass,
            point,
            store,
            &score_seen,
            &score_unseen,
            &tree_damp,
        )
    }

    /// Single-visitor descent toward `point`.
    pub fn traverse<P, V>(
        &mut self,
        point: &[f32],
        store: &P,
        tree_visitor: &mut V,
    ) -> Result<(), TreeError>
    where
        P: PointStoreView,
        V: Visitor,
    {
        self.check_point(point, store)?;

        let root = self
            .root
            .ok_or(TreeError::ContractViolation("traversal requires a non-empty tree"))?;
        let mut view = NodeView::new(self.store.cache_fraction() < SWITCH_FRACTION);

        visitor::traverse_path_to_leaf(&mut self.store, store, point, tree_visitor, &mut view, root, 0)
    }

    /// Multi-visitor descent, forking where the visitor's trigger fires.
    pub fn traverse_multi<P, M>(
        &mut self,
        point: &[f32],
        store: &P,
        tree_visitor: &mut M,
    ) -> Result<(), TreeError>
    where
        P: PointStoreView,
        M: MultiVisitor,
    {
        self.check_point(point, store)?;

        let root = self
            .root
            .ok_or(TreeError::ContractViolation("traversal requires a non-empty tree"))?;
        let mut view = NodeView::new(false);

        visitor::traverse_tree_multi(&mut self.store, store, point, tree_visitor, &mut view, root, 0)
    }

    /// Descent stack of `(visited, sibling)` pairs from the root toward
    /// `point`.
    pub fn get_path(&self, point: &[f32]) -> Result<Vec<(usize, usize)>, TreeError> {
        let root = self
            .root
            .ok_or(TreeError::ContractViolation("path requires a non-empty tree"))?;

        Ok(self.store.get_path(root, point))
    }

    /// Parent slot of an interior slot (`None` for the root); requires
    /// parent tracking.
    pub fn parent_of(&self, slot: usize) -> Result<Option<usize>, TreeError> {
        self.store.parent_of(slot)
    }

    /// Left children in the combined namespace, for persistence.
    #[must_use]
    pub fn left_index_vec(&self) -> Vec<u32> {
        self.store.left_index_vec()
    }

    /// Right children in the combined namespace, for persistence.
    #[must_use]
    pub fn right_index_vec(&self) -> Vec<u32> {
        self.store.right_index_vec()
    }

    #[must_use]
    pub fn cut_dimension_vec(&self) -> Vec<u32> {
        self.store.cut_dimension_vec()
    }

    #[must_use]
    pub fn cut_value_vec(&self) -> Vec<f32> {
        self.store.cut_value_vec()
    }

    fn check_point<P: PointStoreView>(&self, point: &[f32], store: &P) -> Result<(), TreeError> {
        if point.len() != self.store.dimensions() || store.dimensions() != self.store.dimensions()
        {
            return Err(TreeError::ContractViolation("point dimension mismatch"));
        }

        Ok(())
    }
}

// ============================================================================
//  TreeBuilder
// ============================================================================

/// Storage layout of a tree's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `u8` cells: `capacity < 256`, `dimensions <= 256`.
    Small,

    /// `u16` cells: `capacity < 65_535`, `dimensions <= 65_535`.
    Medium,

    /// `u32` cells.
    Large,
}

/// Persisted structural columns for reconstructing a tree.
///
/// All four vectors must have length `capacity`. Child values use the
/// combined namespace; leaf children are ignored on load (leaves are
/// replayed through `add_to_partial_tree`, which rebuilds masses and
/// bookkeeping as it goes).
#[derive(Debug, Clone)]
pub struct TreeColumns {
    pub left_index: Vec<u32>,
    pub right_index: Vec<u32>,
    pub cut_dimension: Vec<u32>,
    pub cut_values: Vec<f32>,
    pub root: Option<usize>,
}

/// Configuration for one tree; `build` validates the cross-field
/// constraints and picks the storage layout.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    dimensions: usize,
    capacity: usize,
    bounding_box_cache_fraction: f64,
    center_of_mass_enabled: bool,
    store_sequences_enabled: bool,
    store_parent: bool,
    random_seed: u64,
    layout: Option<Layout>,
    columns: Option<TreeColumns>,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            dimensions: 0,
            capacity: 0,
            bounding_box_cache_fraction: 1.0,
            center_of_mass_enabled: false,
            store_sequences_enabled: false,
            store_parent: false,
            random_seed: 42,
            layout: None,
            columns: None,
        }
    }

    /// Point vector length; fixed for the tree's life.
    #[must_use]
    pub fn dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Maximum interior nodes; also fixes the leaf-index offset.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Fraction of interior slots carrying a cached bounding box.
    #[must_use]
    pub fn bounding_box_cache_fraction(mut self, fraction: f64) -> Self {
        self.bounding_box_cache_fraction = fraction;
        self
    }

    #[must_use]
    pub fn center_of_mass_enabled(mut self, enabled: bool) -> Self {
        self.center_of_mass_enabled = enabled;
        self
    }

    #[must_use]
    pub fn store_sequences_enabled(mut self, enabled: bool) -> Self {
        self.store_sequences_enabled = enabled;
        self
    }

    #[must_use]
    pub fn store_parent(mut self, enabled: bool) -> Self {
        self.store_parent = enabled;
        self
    }

    /// Seed for the default random cut policy.
    #[must_use]
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    /// Force a storage layout instead of deriving it from `capacity` and
    /// `dimensions`. A layout too narrow for the configuration is rejected
    /// at build time; a wider one only costs memory.
    #[must_use]
    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Reconstruct structure from persisted column vectors.
    #[must_use]
    pub fn columns(mut self, columns: TreeColumns) -> Self {
        self.columns = Some(columns);
        self
    }

    /// Build with the default seeded random cut policy.
    pub fn build(self) -> Result<RandomCutTree<RandomCutSource>, TreeError> {
        let seed = self.random_seed;

        self.build_with_cut_source(RandomCutSource::seeded(seed))
    }

    /// Build with an explicit cut policy.
    pub fn build_with_cut_source<S: CutSource>(
        self,
        cut_source: S,
    ) -> Result<RandomCutTree<S>, TreeError> {
        if self.capacity == 0 || self.dimensions == 0 {
            return Err(TreeError::ContractViolation(
                "capacity and dimensions must be positive",
            ));
        }

        let layout = self.layout.unwrap_or({
            if self.capacity < 256 && self.dimensions <= 256 {
                Layout::Small
            } else if self.capacity < 65_535 && self.dimensions <= 65_535 {
                Layout::Medium
            } else {
                Layout::Large
            }
        });

        match layout {
            Layout::Small => Ok(RandomCutTree::Small(self.build_core::<u8, u8, S>(cut_source)?)),

            Layout::Medium => {
                Ok(RandomCutTree::Medium(self.build_core::<u16, u16, S>(cut_source)?))
            }

            Layout::Large => Ok(RandomCutTree::Large(self.build_core::<u32, u32, S>(cut_source)?)),
        }
    }

    fn build_core<C: IndexWidth, D: IndexWidth, S: CutSource>(
        self,
        cut_source: S,
    ) -> Result<TreeCore<C, D, S>, TreeError> {
        match self.columns {
            None => {
                let store = NodeStore::new(
                    self.capacity,
                    self.dimensions,
                    self.bounding_box_cache_fraction,
                    self.center_of_mass_enabled,
                    self.store_sequences_enabled,
                    self.store_parent,
                )?;

                Ok(TreeCore::new(store, cut_source, None))
            }

            Some(columns) => {
                if let Some(root) = columns.root {
                    if root == self.capacity {
                        return Err(TreeError::ContractViolation("root cannot be the sentinel"));
                    }
                }

                let store = NodeStore::from_columns(
                    self.capacity,
                    self.dimensions,
                    self.bounding_box_cache_fraction,
                    self.center_of_mass_enabled,
                    self.store_sequences_enabled,
                    self.store_parent,
                    &columns.left_index,
                    &columns.right_index,
                    &columns.cut_dimension,
                    &columns.cut_values,
                    columns.root,
                )?;

                Ok(TreeCore::new(store, cut_source, columns.root))
            }
        }
    }
}

// ============================================================================
//  RandomCutTree
// ============================================================================

/// A tree over one of the three width-specialized layouts.
///
/// The layout is picked at construction from `capacity` and `dimensions`;
/// it changes memory use only, never behavior.
#[derive(Debug)]
pub enum RandomCutTree<S: CutSource = RandomCutSource> {
    Small(TreeCore<u8, u8, S>),
    Medium(TreeCore<u16, u16, S>),
    Large(TreeCore<u32, u32, S>),
}

macro_rules! with_core {
    ($self:expr, $core:ident => $body:expr) => {
        match $self {
            RandomCutTree::Small($core) => $body,
            RandomCutTree::Medium($core) => $body,
            RandomCutTree::Large($core) => $body,
        }
    };
}

impl RandomCutTree<RandomCutSource> {
    #[must_use]
    pub fn builder() -> TreeBuilder {
        TreeBuilder::new()
    }
}

impl<S: CutSource> RandomCutTree<S> {
    /// Sliding-window update: evict the oldest occurrence when the window
    /// is full, then insert the new one.
    pub fn update<P: PointStoreView>(
        &mut self,
        point_index: u32,
        sequence_index: u64,
        store: &P,
    ) -> Result<UpdateResult, TreeError> {
        with_core!(self, core => core.update(point_index, sequence_index, store))
    }

    /// Insert one occurrence; returns the leaf index it landed on.
    pub fn add_point<P: PointStoreView>(
        &mut self,
        point_index: u32,
        sequence_index: u64,
        store: &P,
    ) -> Result<usize, TreeError> {
        with_core!(self, core => core.add_point(point_index, sequence_index, store))
    }

    /// Remove one occurrence; returns the canonical point index of the
    /// removed leaf.
    pub fn delete_point<P: PointStoreView>(
        &mut self,
        point_index: u32,
        sequence_index: u64,
        store: &P,
    ) -> Result<u32, TreeError> {
        with_core!(self, core => core.delete_point(point_index, sequence_index, store))
    }

    /// Replay one occurrence into a tree reconstructed from columns.
    pub fn add_to_partial_tree<P: PointStoreView>(
        &mut self,
        point_index: u32,
        sequence_index: u64,
        store: &P,
    ) -> Result<usize, TreeError> {
        with_core!(self, core => core.add_to_partial_tree(point_index, sequence_index, store))
    }

    pub fn score<P, F1, F2, F3>(
        &mut self,
        point: &[f32],
        ignore_mass: usize,
        store: &P,
        score_seen: F1,
        score_unseen: F2,
        tree_damp: F3,
    ) -> Result<f64, TreeError>
    where
        P: PointStoreView,
        F1: Fn(f64, f64) -> f64,
        F2: Fn(f64, f64) -> f64,
        F3: Fn(f64) -> f64,
    {
        with_core!(self, core => {
            core.score(point, ignore_mass, store, score_seen, score_unseen, tree_damp)
        })
    }

    pub fn traverse<P, V>(
        &mut self,
        point: &[f32],
        store: &P,
        tree_visitor: &mut V,
    ) -> Result<(), TreeError>
    where
        P: PointStoreView,
        V: Visitor,
    {
        with_core!(self, core => core.traverse(point, store, tree_visitor))
    }

    pub fn traverse_multi<P, M>(
        &mut self,
        point: &[f32],
        store: &P,
        tree_visitor: &mut M,
    ) -> Result<(), TreeError>
    where
        P: PointStoreView,
        M: MultiVisitor,
    {
        with_core!(self, core => core.traverse_multi(point, store, tree_visitor))
    }

    pub fn resize_cache(&mut self, fraction: f64) -> Result<(), TreeError> {
        with_core!(self, core => core.resize_cache(fraction))
    }

    pub fn bounding_box<P: PointStoreView>(
        &mut self,
        index: usize,
        store: &P,
    ) -> Result<BoundingBox, TreeError> {
        with_core!(self, core => core.bounding_box(index, store))
    }

    pub fn point_sum<P: PointStoreView>(
        &mut self,
        index: usize,
        store: &P,
    ) -> Result<Vec<f32>, TreeError> {
        with_core!(self, core => core.point_sum(index, store))
    }

    #[must_use]
    pub fn size(&self) -> usize {
        with_core!(self, core => core.size())
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        with_core!(self, core => core.capacity())
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        with_core!(self, core => core.dimensions())
    }

    #[must_use]
    pub fn mass(&self) -> usize {
        with_core!(self, core => core.mass())
    }

    #[must_use]
    pub fn root(&self) -> Option<usize> {
        with_core!(self, core => core.root())
    }

    #[must_use]
    pub fn is_leaf(&self, index: usize) -> bool {
        with_core!(self, core => core.is_leaf(index))
    }

    #[must_use]
    pub fn is_internal(&self, index: usize) -> bool {
        with_core!(self, core => core.is_internal(index))
    }

    #[must_use]
    pub fn leaf_index(&self, point_index: u32) -> usize {
        with_core!(self, core => core.leaf_index(point_index))
    }

    #[must_use]
    pub fn get_leaf_mass(&self, leaf: usize) -> usize {
        with_core!(self, core => core.get_leaf_mass(leaf))
    }

    #[must_use]
    pub fn cache_fraction(&self) -> f64 {
        with_core!(self, core => core.cache_fraction())
    }

    /// Descent stack of `(visited, sibling)` pairs from the root toward
    /// `point`.
    pub fn get_path(&self, point: &[f32]) -> Result<Vec<(usize, usize)>, TreeError> {
        with_core!(self, core => core.get_path(point))
    }

    /// Parent slot of an interior slot (`None` for the root); requires
    /// parent tracking.
    pub fn parent_of(&self, slot: usize) -> Result<Option<usize>, TreeError> {
        with_core!(self, core => core.parent_of(slot))
    }

    /// Extract the persisted structural columns.
    #[must_use]
    pub fn columns(&self) -> TreeColumns {
        with_core!(self, core => TreeColumns {
            left_index: core.left_index_vec(),
            right_index: core.right_index_vec(),
            cut_dimension: core.cut_dimension_vec(),
            cut_values: core.cut_value_vec(),
            root: core.root(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_picks_layout_by_capacity_and_dimensions() {
        let small = RandomCutTree::builder()
            .dimensions(2)
            .capacity(255)
            .build()
            .unwrap();
        assert!(matches!(small, RandomCutTree::Small(_)));

        let medium = RandomCutTree::builder()
            .dimensions(2)
            .capacity(256)
            .build()
            .unwrap();
        assert!(matches!(medium, RandomCutTree::Medium(_)));

        let medium_by_dims = RandomCutTree::builder()
            .dimensions(300)
            .capacity(16)
            .build()
            .unwrap();
        assert!(matches!(medium_by_dims, RandomCutTree::Medium(_)));

        let large = RandomCutTree::builder()
            .dimensions(2)
            .capacity(70_000)
            .build()
            .unwrap();
        assert!(matches!(large, RandomCutTree::Large(_)));
    }

    #[test]
    fn builder_rejects_degenerate_configuration() {
        assert!(RandomCutTree::builder().capacity(4).build().is_err());
        assert!(RandomCutTree::builder().dimensions(2).build().is_err());
        assert!(RandomCutTree::builder()
            .dimensions(2)
            .capacity(4)
            .bounding_box_cache_fraction(1.5)
            .build()
            .is_err());
    }

    #[test]
    fn builder_rejects_malformed_columns() {
        let columns = TreeColumns {
            left_index: vec![0; 3],
            right_index: vec![0; 4],
            cut_dimension: vec![0; 4],
            cut_values: vec![0.0; 4],
            root: None,
        };

        assert!(RandomCutTree::builder()
            .dimensions(2)
            .capacity(4)
            .columns(columns)
            .build()
            .is_err());
    }
}
