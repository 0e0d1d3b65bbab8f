//! Filepath: src/nodestore.rs
//!
//! Column-oriented arena of interior tree nodes.
//!
//! If an array of node records is row-oriented, this store is the
//! column-oriented equivalent: each field of an interior node lives in its
//! own packed array, indexed by slot. Slots are acquired from the
//! free-slot manager when an edge is split and released when a sibling is
//! promoted — never through a general allocator.
//!
//! # Index namespace
//!
//! One integer namespace covers interior nodes and leaves for a store of
//! fixed `capacity` interior slots:
//!
//! - `0 ..= capacity - 1` — interior slot
//! - `capacity` — "unset" sentinel
//! - `capacity + 1 + p` — leaf over point-store index `p`
//!
//! so `is_leaf(i) ⇔ i > capacity` and `point_index(i) = i - capacity - 1`.
//! Path stacks, visitor cursors, and the public accessors all speak this
//! namespace; the width-specialized cells below are an internal encoding.
//!
//! # Cell encoding
//!
//! A child cell stores interior indices (including the sentinel) directly
//! in the narrow type `C`, and a leaf child as its *point index* plus a
//! per-side flag bit. This keeps the `u8`/`u16` layouts addressable over
//! their full configured range: the combined value `capacity + 1 + p` may
//! overflow the cell, the point index itself may not. A point index that
//! does not fit the layout's width is rejected as a contract violation.
//!
//! # Invariants
//!
//! - Every reachable interior slot has both children set; neither is the
//!   sentinel (partial trees under reconstruction excepted).
//! - For every filled cache slot, the stored box is the tight bounding box
//!   of the leaves under that slot's subtree.
//! - `mass[s]` equals the number of leaf occurrences under `s`.
//! - When enabled, `point_sum[s]` is the sum of `point * mass` over the
//!   leaves under `s`.

use std::collections::HashMap;

use crate::boundingbox::BoundingBox;
use crate::boxcache::BoxCache;
use crate::cut::Cut;
use crate::intervals::IntervalManager;
use crate::pointstore::PointStoreView;
use crate::tracing_helpers::{error_log, trace_log};
use crate::tree::TreeError;
use crate::width::IndexWidth;

/// Below this cache fraction, scoring threads a mutable box accumulator
/// through the traversal instead of consulting the cache per node.
pub const SWITCH_FRACTION: f64 = 0.499;

#[inline]
fn flag(bits: &[u64], i: usize) -> bool {
    bits[i >> 6] & (1_u64 << (i & 63)) != 0
}

#[inline]
fn set_flag(bits: &mut [u64], i: usize, value: bool) {
    if value {
        bits[i >> 6] |= 1_u64 << (i & 63);
    } else {
        bits[i >> 6] &= !(1_u64 << (i & 63));
    }
}

/// Column-stored interior nodes plus leaf bookkeeping for one tree.
///
/// # Type Parameters
///
/// * `C` - Cell width of the child columns
/// * `D` - Cell width of the cut-dimension column
#[derive(Clone, Debug)]
pub struct NodeStore<C: IndexWidth, D: IndexWidth> {
    capacity: usize,
    dimensions: usize,

    left: Vec<C>,
    right: Vec<C>,

    /// Per-side flags marking a child cell as a leaf (point index) rather
    /// than an interior index.
    left_leaf_bits: Vec<u64>,
    right_leaf_bits: Vec<u64>,

    cut_dim: Vec<D>,
    cut_value: Vec<f32>,

    /// Leaf occurrences under each interior slot.
    mass: Vec<u32>,

    /// Parent slot per interior slot, `capacity` for the root; present only
    /// with parent tracking enabled.
    parent: Option<Vec<C>>,

    free: IntervalManager,
    cache: BoxCache,

    /// Duplicate count per leaf, stored as `actual - 1`; absence means 1.
    leaf_mass: HashMap<u32, u32>,

    /// Multiset of sequence indices per leaf point, when sequence tracking
    /// is enabled.
    sequence_map: Option<HashMap<u32, HashMap<u64, u32>>>,

    /// Flattened `capacity * dimensions` point sums, when center of mass is
    /// enabled.
    point_sum: Option<Vec<f32>>,
}

impl<C: IndexWidth, D: IndexWidth> NodeStore<C, D> {
    pub(crate) fn new(
        capacity: usize,
        dimensions: usize,
        cache_fraction: f64,
        center_of_mass: bool,
        store_sequences: bool,
        store_parent: bool,
    ) -> Result<Self, TreeError> {
        if capacity == 0 || dimensions == 0 {
            return Err(TreeError::ContractViolation(
                "capacity and dimensions must be positive",
            ));
        }

        if capacity > C::CELL_MAX || dimensions > D::CELL_MAX + 1 {
            return Err(TreeError::ContractViolation(
                "layout width cannot address the configured tree",
            ));
        }

        if !(0.0..=1.0).contains(&cache_fraction) {
            return Err(TreeError::ContractViolation(
                "cache fraction must lie in [0, 1]",
            ));
        }

        let words = capacity.div_ceil(64);
        let sentinel = C::from_index(capacity);

        Ok(Self {
            capacity,
            dimensions,
            left: vec![sentinel; capacity],
            right: vec![sentinel; capacity],
            left_leaf_bits: vec![0; words],
            right_leaf_bits: vec![0; words],
            cut_dim: vec![D::from_index(0); capacity],
            cut_value: vec![0.0; capacity],
            mass: vec![0; capacity],
            parent: store_parent.then(|| vec![sentinel; capacity]),
            free: IntervalManager::new(capacity),
            cache: BoxCache::new(capacity, dimensions, cache_fraction),
            leaf_mass: HashMap::new(),
            sequence_map: store_sequences.then(HashMap::new),
            point_sum: center_of_mass.then(|| vec![0.0; capacity * dimensions]),
        })
    }

    /// Rebuild the structural columns from persisted vectors; masses, leaf
    /// bookkeeping, and caches are repopulated by replaying the leaves
    /// through `add_to_partial_tree`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_columns(
        capacity: usize,
        dimensions: usize,
        cache_fraction: f64,
        center_of_mass: bool,
        store_sequences: bool,
        store_parent: bool,
        left: &[u32],
        right: &[u32],
        cut_dims: &[u32],
        cut_values: &[f32],
        root: Option<usize>,
    ) -> Result<Self, TreeError> {
        let mut store = Self::new(
            capacity,
            dimensions,
            cache_fraction,
            center_of_mass,
            store_sequences,
            store_parent,
        )?;

        if left.len() != capacity
            || right.len() != capacity
            || cut_dims.len() != capacity
            || cut_values.len() != capacity
        {
            return Err(TreeError::ContractViolation(
                "column vectors must have length capacity",
            ));
        }

        // Leaf children are not part of the persisted skeleton: they are
        // replayed through `add_to_partial_tree`, which also rebuilds
        // masses and leaf bookkeeping. Load them as sentinels.
        for slot in 0..capacity {
            let left_child = left[slot] as usize;
            let right_child = right[slot] as usize;

            store.set_left(slot, if left_child > capacity { capacity } else { left_child })?;
            store.set_right(slot, if right_child > capacity { capacity } else { right_child })?;
            store.cut_value[slot] = cut_values[slot];
        }

        // Mark the slots reachable from the root as in use; everything else
        // stays free. Re-reserving a slot means the columns form a cycle.
        let mut pending: Vec<usize> = match root {
            Some(r) if store.is_internal(r) => vec![r],

            _ => Vec::new(),
        };

        while let Some(slot) = pending.pop() {
            store
                .free
                .reserve(slot as u32)
                .map_err(|_| TreeError::ContractViolation("malformed column vectors"))?;

            let dim = cut_dims[slot] as usize;

            if dim >= dimensions {
                return Err(TreeError::ContractViolation(
                    "cut dimension out of range",
                ));
            }

            store.cut_dim[slot] = D::from_index(dim);

            for child in [store.left_index(slot), store.right_index(slot)] {
                if store.is_internal(child) {
                    pending.push(child);
                }

                if let Some(parents) = &mut store.parent {
                    if child < capacity {
                        parents[child] = C::from_index(slot);
                    }
                }
            }
        }

        Ok(store)
    }

    // ========================================================================
    //  Index namespace
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of interior slots in use.
    #[must_use]
    pub fn size(&self) -> usize {
        self.capacity - self.free.size()
    }

    #[inline]
    #[must_use]
    pub fn is_leaf(&self, index: usize) -> bool {
        index > self.capacity
    }

    #[inline]
    #[must_use]
    pub fn is_internal(&self, index: usize) -> bool {
        index < self.capacity
    }

    /// Point-store index of a leaf.
    #[inline]
    #[must_use]
    pub fn point_index(&self, leaf: usize) -> u32 {
        debug_assert!(self.is_leaf(leaf));
        (leaf - self.capacity - 1) as u32
    }

    /// Composite leaf index for a point-store index.
    #[inline]
    #[must_use]
    pub fn leaf_index(&self, point_index: u32) -> usize {
        point_index as usize + self.capacity + 1
    }

    fn encode_child(&self, child: usize) -> Result<(C, bool), TreeError> {
        if child <= self.capacity {
            return Ok((C::from_index(child), false));
        }

        let point_index = child - self.capacity - 1;
        let cell = C::try_from_index(point_index).ok_or(TreeError::ContractViolation(
            "point index exceeds layout width",
        ))?;

        Ok((cell, true))
    }

    #[inline]
    fn decode_child(&self, cell: C, leaf: bool) -> usize {
        if leaf {
            cell.index() + self.capacity + 1
        } else {
            cell.index()
        }
    }

    #[inline]
    #[must_use]
    pub fn left_index(&self, slot: usize) -> usize {
        self.decode_child(self.left[slot], flag(&self.left_leaf_bits, slot))
    }

    #[inline]
    #[must_use]
    pub fn right_index(&self, slot: usize) -> usize {
        self.decode_child(self.right[slot], flag(&self.right_leaf_bits, slot))
    }

    fn set_left(&mut self, slot: usize, child: usize) -> Result<(), TreeError> {
        let (cell, leaf) = self.encode_child(child)?;

        self.left[slot] = cell;
        set_flag(&mut self.left_leaf_bits, slot, leaf);
        Ok(())
    }

    fn set_right(&mut self, slot: usize, child: usize) -> Result<(), TreeError> {
        let (cell, leaf) = self.encode_child(child)?;

        self.right[slot] = cell;
        set_flag(&mut self.right_leaf_bits, slot, leaf);
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn cut_dimension(&self, slot: usize) -> usize {
        self.cut_dim[slot].index()
    }

    #[inline]
    #[must_use]
    pub fn cut_value(&self, slot: usize) -> f32 {
        self.cut_value[slot]
    }

    /// The other child of `parent`.
    pub fn get_sibling(&self, node: usize, parent: usize) -> Result<usize, TreeError> {
        if self.left_index(parent) == node {
            Ok(self.right_index(parent))
        } else if self.right_index(parent) == node {
            Ok(self.left_index(parent))
        } else {
            Err(TreeError::ContractViolation("node is not a child of parent"))
        }
    }

    /// Parent slot of an interior slot, when parent tracking is enabled.
    /// Returns `None` for the root.
    pub fn parent_of(&self, slot: usize) -> Result<Option<usize>, TreeError> {
        let parents = self
            .parent
            .as_ref()
            .ok_or(TreeError::ContractViolation("parent tracking disabled"))?;
        let value = parents[slot].index();

        Ok((value != self.capacity).then_some(value))
    }

    /// Whether `point` descends left at `slot`.
    #[inline]
    #[must_use]
    pub fn left_of(&self, slot: usize, point: &[f32]) -> bool {
        point[self.cut_dim[slot].index()] <= self.cut_value[slot]
    }

    // ========================================================================
    //  Mass and leaf bookkeeping
    // ========================================================================

    /// Mass of any index: duplicate count at a leaf, subtree occurrence
    /// count at an interior slot, zero at the sentinel.
    #[must_use]
    pub fn get_mass(&self, index: usize) -> usize {
        if self.is_leaf(index) {
            self.get_leaf_mass(index)
        } else if self.is_internal(index) {
            self.mass[index] as usize
        } else {
            0
        }
    }

    #[must_use]
    pub fn get_leaf_mass(&self, leaf: usize) -> usize {
        let point_index = self.point_index(leaf);

        self.leaf_mass
            .get(&point_index)
            .map_or(1, |stored| *stored as usize + 1)
    }

    pub fn increase_leaf_mass(&mut self, leaf: usize) {
        let point_index = self.point_index(leaf);

        *self.leaf_mass.entry(point_index).or_insert(0) += 1;
    }

    /// Decrement a leaf's duplicate count.
    ///
    /// Returns `0` when the leaf was a singleton — the caller must unlink
    /// it from the tree — and the prior stored count otherwise.
    pub fn decrease_leaf_mass(&mut self, leaf: usize) -> u32 {
        let point_index = self.point_index(leaf);

        match self.leaf_mass.remove(&point_index) {
            Some(stored) if stored > 1 => {
                self.leaf_mass.insert(point_index, stored - 1);
                stored
            }

            Some(_) => 1,

            None => 0,
        }
    }

    /// Record a leaf occurrence and return its composite index.
    pub fn add_leaf(&mut self, point_index: u32, sequence_index: u64) -> usize {
        if let Some(map) = &mut self.sequence_map {
            *map.entry(point_index)
                .or_default()
                .entry(sequence_index)
                .or_insert(0) += 1;
        }

        self.leaf_index(point_index)
    }

    /// Remove one `(point, sequence)` occurrence from the sequence multiset.
    pub fn remove_leaf(&mut self, point_index: u32, sequence_index: u64) -> Result<(), TreeError> {
        let map = self
            .sequence_map
            .as_mut()
            .ok_or(TreeError::ContractViolation("sequence tracking disabled"))?;
        let leaf_map = map.get_mut(&point_index).ok_or(TreeError::MissingLeaf)?;
        let count = leaf_map.get_mut(&sequence_index).ok_or(TreeError::MissingLeaf)?;

        if *count > 1 {
            *count -= 1;
        } else {
            leaf_map.remove(&sequence_index);

            if leaf_map.is_empty() {
                map.remove(&point_index);
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn sequences_enabled(&self) -> bool {
        self.sequence_map.is_some()
    }

    /// Recorded occurrences of a `(point, sequence)` pair.
    #[must_use]
    pub fn sequence_count(&self, point_index: u32, sequence_index: u64) -> usize {
        self.sequence_map
            .as_ref()
            .and_then(|map| map.get(&point_index))
            .and_then(|leaf_map| leaf_map.get(&sequence_index))
            .map_or(0, |count| *count as usize)
    }

    fn increase_mass_of_internal(&mut self, slot: usize) -> Result<(), TreeError> {
        if !self.is_internal(slot) {
            return Err(TreeError::ContractViolation("internal index expected"));
        }

        self.mass[slot] += 1;
        Ok(())
    }

    fn decrease_mass_of_internal(&mut self, slot: usize) -> Result<(), TreeError> {
        if !self.is_internal(slot) {
            return Err(TreeError::ContractViolation("internal index expected"));
        }

        self.mass[slot] = self.mass[slot]
            .checked_sub(1)
            .ok_or(TreeError::ContractViolation("interior mass underflow"))?;
        Ok(())
    }

    // ========================================================================
    //  Center of mass
    // ========================================================================

    /// The subtree point sum: `point * mass` at a leaf, the stored row at an
    /// interior slot, zeros at the sentinel (partial trees).
    pub fn get_point_sum<P: PointStoreView>(
        &self,
        index: usize,
        store: &P,
    ) -> Result<Vec<f32>, TreeError> {
        let sums = self
            .point_sum
            .as_ref()
            .ok_or(TreeError::ContractViolation("center of mass disabled"))?;

        if self.is_leaf(index) {
            let point_index = self.point_index(index);

            Ok(store.get_scaled_point(point_index, self.get_leaf_mass(index) as f64))
        } else if self.is_internal(index) {
            let base = index * self.dimensions;

            Ok(sums[base..base + self.dimensions].to_vec())
        } else {
            Ok(vec![0.0; self.dimensions])
        }
    }

    pub fn invalidate_point_sum(&mut self, slot: usize) {
        if let Some(sums) = &mut self.point_sum {
            let base = slot * self.dimensions;

            sums[base..base + self.dimensions].fill(0.0);
        }
    }

    pub fn recompute_point_sum<P: PointStoreView>(
        &mut self,
        slot: usize,
        store: &P,
    ) -> Result<(), TreeError> {
        let left = self.get_point_sum(self.left_index(slot), store)?;
        let right = self.get_point_sum(self.right_index(slot), store)?;
        let sums = self
            .point_sum
            .as_mut()
            .ok_or(TreeError::ContractViolation("center of mass disabled"))?;
        let base = slot * self.dimensions;

        for i in 0..self.dimensions {
            sums[base + i] = left[i] + right[i];
        }

        Ok(())
    }

    #[must_use]
    pub fn center_of_mass_enabled(&self) -> bool {
        self.point_sum.is_some()
    }

    // ========================================================================
    //  Bounding boxes
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn cache_fraction(&self) -> f64 {
        self.cache.fraction()
    }

    pub fn resize_cache(&mut self, fraction: f64) -> Result<(), TreeError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(TreeError::ContractViolation(
                "cache fraction must lie in [0, 1]",
            ));
        }

        self.cache.resize(fraction);
        Ok(())
    }

    /// The bounding box of the subtree under `index`.
    ///
    /// Leaf boxes are the degenerate point box. Interior boxes come from
    /// the cache when filled; otherwise they are reconstructed from the
    /// children, and any empty cache slot encountered on the way is
    /// populated opportunistically.
    pub fn get_box<P: PointStoreView>(
        &mut self,
        index: usize,
        store: &P,
    ) -> Result<BoundingBox, TreeError> {
        if self.is_leaf(index) {
            return Ok(BoundingBox::from_point(store.get(self.point_index(index))));
        }

        if !self.is_internal(index) {
            return Err(TreeError::ContractViolation("incomplete state"));
        }

        match self.cache.translate(index) {
            Some(idx) if self.cache.is_filled(index) => Ok(self.cache.box_from_data(idx)),

            Some(idx) => {
                let reconstructed = self.reconstruct_box(index, store)?;

                self.cache.copy_box_to_data(idx, &reconstructed);
                Ok(reconstructed)
            }

            None => self.reconstruct_box(index, store),
        }
    }

    fn reconstruct_box<P: PointStoreView>(
        &mut self,
        index: usize,
        store: &P,
    ) -> Result<BoundingBox, TreeError> {
        let mut bounding_box = self.get_box(self.left_index(index), store)?;

        self.grow_node_box(&mut bounding_box, store, index, self.right_index(index))?;
        Ok(bounding_box)
    }

    /// Extend `bounding_box` by the subtree under `sibling`, consulting
    /// caches transparently.
    pub fn grow_node_box<P: PointStoreView>(
        &mut self,
        bounding_box: &mut BoundingBox,
        store: &P,
        _node: usize,
        sibling: usize,
    ) -> Result<(), TreeError> {
        if self.is_leaf(sibling) {
            bounding_box.add_point(store.get(self.point_index(sibling)));
            return Ok(());
        }

        if !self.is_internal(sibling) {
            return Err(TreeError::ContractViolation("incomplete state"));
        }

        match self.cache.translate(sibling) {
            Some(idx) if self.cache.is_filled(sibling) => {
                bounding_box.add_box(&self.cache.box_from_data(idx));
                Ok(())
            }

            Some(_) => {
                // get_box fills the empty slot as a side effect.
                let sibling_box = self.get_box(sibling, store)?;

                bounding_box.add_box(&sibling_box);
                Ok(())
            }

            None => {
                self.grow_node_box(bounding_box, store, sibling, self.left_index(sibling))?;
                self.grow_node_box(bounding_box, store, sibling, self.right_index(sibling))
            }
        }
    }

    /// Validate the cached box against a point that may have left the
    /// subtree's extent, reconstructing it when strict containment fails.
    ///
    /// Returns `true` iff the slot is cached, non-empty, and the point lies
    /// strictly inside — in which case no box above this one can have
    /// changed either.
    pub fn check_contains_and_rebuild_box<P: PointStoreView>(
        &mut self,
        index: usize,
        point: &[f32],
        store: &P,
    ) -> Result<bool, TreeError> {
        if !self.cache.is_filled(index) {
            return Ok(false);
        }

        if self.cache.check_strictly_contains(index, point) {
            return Ok(true);
        }

        let rebuilt = self.reconstruct_box(index, store)?;

        if let Some(idx) = self.cache.translate(index) {
            self.cache.copy_box_to_data(idx, &rebuilt);
        }

        Ok(false)
    }

    /// Fold a point into the cached box, reporting prior containment. See
    /// [`BoxCache::check_contains_and_add_point`].
    pub fn check_contains_and_add_point(&mut self, index: usize, point: &[f32]) -> bool {
        self.cache.check_contains_and_add_point(index, point)
    }

    /// Probability that a random cut at `node` separates `point` from the
    /// subtree, preferring the cache, then the caller's accumulator, then
    /// lazy materialization.
    pub fn probability_of_cut<P: PointStoreView>(
        &mut self,
        node: usize,
        point: &[f32],
        store: &P,
        accumulator: Option<&BoundingBox>,
    ) -> Result<f64, TreeError> {
        if let Some(idx) = self.cache.translate(node) {
            if self.cache.is_filled(node) {
                return Ok(self.cache.probability_of_cut(idx, point));
            }
        }

        if let Some(boxed) = accumulator {
            return Ok(boxed.probability_of_cut(point));
        }

        let materialized = self.get_box(node, store)?;

        Ok(materialized.probability_of_cut(point))
    }

    // ========================================================================
    //  Structure mutation
    // ========================================================================

    /// Descend from `root` toward `point`, returning the stack of
    /// `(visited, sibling)` pairs ending at a non-interior index — a leaf,
    /// or the sentinel in a partial tree. The root entry carries the
    /// sentinel as its sibling.
    #[must_use]
    pub fn get_path(&self, root: usize, point: &[f32]) -> Vec<(usize, usize)> {
        let mut path: Vec<(usize, usize)> = vec![(root, self.capacity)];
        let mut node = root;

        while self.is_internal(node) {
            let left = self.left_index(node);
            let right = self.right_index(node);

            if self.left_of(node, point) {
                path.push((left, right));
                node = left;
            } else {
                path.push((right, left));
                node = right;
            }
        }

        path
    }

    /// Split the edge above `displaced` with a fresh interior node.
    ///
    /// The new slot takes the supplied cut, adopts the new leaf and the
    /// displaced subtree on the sides the cut dictates, and seeds its cache
    /// entry from `subtree_box` (the displaced subtree's box) before
    /// folding the new point in. Returns `(slot, leaf)`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_node<P: PointStoreView>(
        &mut self,
        parent: Option<usize>,
        displaced: usize,
        point: &[f32],
        point_index: u32,
        sequence_index: u64,
        cut: Cut,
        subtree_box: &BoundingBox,
        store: &P,
    ) -> Result<(usize, usize), TreeError> {
        if cut.dimension >= self.dimensions {
            return Err(TreeError::ContractViolation("cut dimension out of range"));
        }

        let Some(slot) = self.free.take() else {
            error_log!(capacity = self.capacity, "interior node arena exhausted");
            return Err(TreeError::StoreFull);
        };
        let slot = slot as usize;
        let leaf = self.add_leaf(point_index, sequence_index);

        self.cut_dim[slot] = D::from_index(cut.dimension);
        self.cut_value[slot] = cut.value;

        if point[cut.dimension] <= cut.value {
            self.set_left(slot, leaf)?;
            self.set_right(slot, displaced)?;
        } else {
            self.set_left(slot, displaced)?;
            self.set_right(slot, leaf)?;
        }

        self.mass[slot] = (self.get_mass(displaced) + 1) as u32;

        match parent {
            Some(parent_slot) => self.splice_edge(parent_slot, displaced, slot)?,

            None => {
                if let Some(parents) = &mut self.parent {
                    parents[slot] = C::from_index(self.capacity);
                }
            }
        }

        if self.is_internal(displaced) {
            if let Some(parents) = &mut self.parent {
                parents[displaced] = C::from_index(slot);
            }
        }

        if let Some(idx) = self.cache.translate(slot) {
            self.cache.copy_box_to_data(idx, subtree_box);
            self.cache.check_contains_and_add_point(slot, point);
        }

        if self.point_sum.is_some() {
            self.recompute_point_sum(slot, store)?;
        }

        trace_log!(slot, leaf, "split edge with fresh interior node");
        Ok((slot, leaf))
    }

    /// Replace the sentinel child on `point`'s side of `parent` with a
    /// replayed leaf (partial-tree reconstruction only).
    pub(crate) fn attach_leaf(
        &mut self,
        parent: usize,
        leaf: usize,
        point: &[f32],
    ) -> Result<(), TreeError> {
        if self.left_of(parent, point) {
            if self.left_index(parent) != self.capacity {
                return Err(TreeError::ContractViolation("leaf slot already occupied"));
            }

            self.set_left(parent, leaf)
        } else {
            if self.right_index(parent) != self.capacity {
                return Err(TreeError::ContractViolation("leaf slot already occupied"));
            }

            self.set_right(parent, leaf)
        }
    }

    /// Redirect the parent's child pointer from `old_child` to `new_child`.
    pub fn splice_edge(
        &mut self,
        parent: usize,
        old_child: usize,
        new_child: usize,
    ) -> Result<(), TreeError> {
        if self.left_index(parent) == old_child {
            self.set_left(parent, new_child)?;
        } else if self.right_index(parent) == old_child {
            self.set_right(parent, new_child)?;
        } else {
            return Err(TreeError::ContractViolation("node is not a child of parent"));
        }

        let internal_child = self.is_internal(new_child);

        if let Some(parents) = &mut self.parent {
            if internal_child {
                parents[new_child] = C::from_index(parent);
            }
        }

        Ok(())
    }

    /// Promote `node`'s sibling into `parent`'s place under `grandparent`
    /// (or as the caller's new root when `grandparent` is `None`). Returns
    /// the promoted sibling.
    pub fn replace_parent_by_sibling(
        &mut self,
        grandparent: Option<usize>,
        parent: usize,
        node: usize,
    ) -> Result<usize, TreeError> {
        let sibling = self.get_sibling(node, parent)?;

        match grandparent {
            Some(grandparent_slot) => self.splice_edge(grandparent_slot, parent, sibling)?,

            None => {
                let internal_sibling = self.is_internal(sibling);

                if let Some(parents) = &mut self.parent {
                    if internal_sibling {
                        parents[sibling] = C::from_index(self.capacity);
                    }
                }
            }
        }

        Ok(sibling)
    }

    /// Release an interior slot and wipe its derived state.
    pub fn delete_internal_node(&mut self, slot: usize) -> Result<(), TreeError> {
        self.free.release(slot as u32)?;

        if let Some(idx) = self.cache.translate(slot) {
            self.cache.clear(idx);
        }

        self.invalidate_point_sum(slot);
        self.mass[slot] = 0;
        self.cut_dim[slot] = D::from_index(0);
        self.cut_value[slot] = 0.0;
        self.set_left(slot, self.capacity)?;
        self.set_right(slot, self.capacity)?;

        if let Some(parents) = &mut self.parent {
            parents[slot] = C::from_index(self.capacity);
        }

        trace_log!(slot, "released interior node");
        Ok(())
    }

    /// Ancestor fix-up after an insert: pop each ancestor, bump its mass,
    /// refresh its point sum, then repair and extend its cached box — the
    /// rebuild corrects any stale shape before the point is folded in.
    pub fn manage_ancestors_add<P: PointStoreView>(
        &mut self,
        path: &mut Vec<(usize, usize)>,
        point: &[f32],
        store: &P,
    ) -> Result<(), TreeError> {
        while let Some((index, _)) = path.pop() {
            self.increase_mass_of_internal(index)?;

            if self.point_sum.is_some() {
                self.recompute_point_sum(index, store)?;
            }

            if self.cache.fraction() > 0.0 {
                self.check_contains_and_rebuild_box(index, point, store)?;
                self.cache.check_contains_and_add_point(index, point);
            }
        }

        Ok(())
    }

    /// Ancestor fix-up after a delete. Boxes are rebuilt only until the
    /// first ancestor strictly contains the removed point: above that
    /// level the deletion cannot have shrunk any box.
    pub fn manage_ancestors_delete<P: PointStoreView>(
        &mut self,
        path: &mut Vec<(usize, usize)>,
        point: &[f32],
        store: &P,
    ) -> Result<(), TreeError> {
        let mut resolved = false;

        while let Some((index, _)) = path.pop() {
            self.decrease_mass_of_internal(index)?;

            if self.point_sum.is_some() {
                self.recompute_point_sum(index, store)?;
            }

            if self.cache.fraction() > 0.0 && !resolved {
                resolved = self.check_contains_and_rebuild_box(index, point, store)?;
            }
        }

        Ok(())
    }

    // ========================================================================
    //  Scoring traversal
    // ========================================================================

    /// Recursive scalar scoring. Returns `[prob, score, ignore_flag]`:
    /// `prob` is the probability the current subtree induces a new cut for
    /// `point`, `score` the accumulated anomaly score, and `ignore_flag`
    /// records whether a live leaf has contributed to the accumulator box.
    #[allow(clippy::too_many_arguments)]
    pub fn score_scalar<P, F1, F2, F3>(
        &mut self,
        node: usize,
        depth: usize,
        mut accumulator: Option<&mut BoundingBox>,
        ignore_mass: usize,
        point: &[f32],
        store: &P,
        score_seen: &F1,
        score_unseen: &F2,
        tree_damp: &F3,
    ) -> Result<[f64; 3], TreeError>
    where
        P: PointStoreView,
        F1: Fn(f64, f64) -> f64,
        F2: Fn(f64, f64) -> f64,
        F3: Fn(f64) -> f64,
    {
        if self.is_leaf(node) {
            let mass = self.get_mass(node) as f64;
            let point_index = self.point_index(node);
            let ignore_flag: f64 = if self.get_mass(node) > ignore_mass { 1.0 } else { 0.0 };

            if let Some(boxed) = accumulator.as_deref_mut() {
                boxed.replace_with_point(store.get(point_index));
            }

            if store.is_equal(point, point_index) && ignore_flag == 1.0 {
                return Ok([
                    0.0,
                    tree_damp(mass) * score_seen(depth as f64, mass),
                    ignore_flag,
                ]);
            }

            return Ok([1.0, score_unseen(depth as f64, mass), ignore_flag]);
        }

        if !self.is_internal(node) {
            return Err(TreeError::ContractViolation("incomplete state"));
        }

        let left = self.left_index(node);
        let right = self.right_index(node);
        let (next, sibling) = if self.left_of(node, point) {
            (left, right)
        } else {
            (right, left)
        };

        let mut answer = self.score_scalar(
            next,
            depth + 1,
            accumulator.as_deref_mut(),
            ignore_mass,
            point,
            store,
            score_seen,
            score_unseen,
            tree_damp,
        )?;

        if answer[0] != 0.0 {
            if let Some(boxed) = accumulator.as_deref_mut() {
                if answer[2] == 1.0 {
                    self.grow_node_box(boxed, store, node, sibling)?;
                } else {
                    let sibling_box = self.get_box(sibling, store)?;

                    boxed.copy_from(&sibling_box);
                    answer[2] = 1.0;
                }
            }
        }

        if answer[0] == 0.0 {
            return Ok(answer);
        }

        let prob = if ignore_mass == 0 {
            self.probability_of_cut(node, point, store, accumulator.as_deref())?
        } else {
            accumulator
                .as_deref()
                .ok_or(TreeError::ContractViolation(
                    "ignore mass requires a box accumulator",
                ))?
                .probability_of_cut(point)
        };

        answer[0] = prob;
        answer[1] = answer[1] * (1.0 - prob)
            + prob * score_unseen(depth as f64, self.get_mass(node) as f64);
        Ok(answer)
    }

    /// Scoring entry point: picks whether to thread a box accumulator based
    /// on cache coverage and the ignore-mass policy, then runs
    /// [`NodeStore::score_scalar`].
    pub fn dynamic_score<P, F1, F2, F3>(
        &mut self,
        root: Option<usize>,
        ignore_mass: usize,
        point: &[f32],
        store: &P,
        score_seen: &F1,
        score_unseen: &F2,
        tree_damp: &F3,
    ) -> Result<f64, TreeError>
    where
        P: PointStoreView,
        F1: Fn(f64, f64) -> f64,
        F2: Fn(f64, f64) -> f64,
        F3: Fn(f64) -> f64,
    {
        let Some(root) = root else {
            return Ok(0.0);
        };

        let mut accumulator = (self.cache.fraction() < SWITCH_FRACTION || ignore_mass > 0)
            .then(|| BoundingBox::from_point(&vec![0.0; self.dimensions]));

        let answer = self.score_scalar(
            root,
            0,
            accumulator.as_mut(),
            ignore_mass,
            point,
            store,
            score_seen,
            score_unseen,
            tree_damp,
        )?;

        Ok(answer[1])
    }

    // ========================================================================
    //  Column extraction
    // ========================================================================

    /// Left children in the combined namespace, for persistence.
    #[must_use]
    pub fn left_index_vec(&self) -> Vec<u32> {
        (0..self.capacity)
            .map(|slot| self.left_index(slot) as u32)
            .collect()
    }

    /// Right children in the combined namespace, for persistence.
    #[must_use]
    pub fn right_index_vec(&self) -> Vec<u32> {
        (0..self.capacity)
            .map(|slot| self.right_index(slot) as u32)
            .collect()
    }

    #[must_use]
    pub fn cut_dimension_vec(&self) -> Vec<u32> {
        self.cut_dim.iter().map(|d| d.index() as u32).collect()
    }

    #[must_use]
    pub fn cut_value_vec(&self) -> Vec<f32> {
        self.cut_value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointstore::PointStore;

    type SmallStore = NodeStore<u8, u8>;

    fn small_store(capacity: usize) -> SmallStore {
        SmallStore::new(capacity, 2, 1.0, false, true, false).unwrap()
    }

    #[test]
    fn namespace_partitions_indices() {
        let store = small_store(4);

        assert!(store.is_internal(0));
        assert!(store.is_internal(3));
        assert!(!store.is_internal(4));
        assert!(!store.is_leaf(4));
        assert!(store.is_leaf(5));
        assert_eq!(store.point_index(5), 0);
        assert_eq!(store.leaf_index(7), 12);
    }

    #[test]
    fn leaf_children_round_trip_through_cells() {
        let mut store = small_store(200);

        // Point index 200 gives a combined index of 401, which cannot be
        // stored directly in a u8 cell.
        let leaf = store.leaf_index(200);

        store.set_left(0, leaf).unwrap();
        store.set_right(0, 7).unwrap();

        assert_eq!(store.left_index(0), leaf);
        assert_eq!(store.right_index(0), 7);
    }

    #[test]
    fn oversized_point_index_is_rejected() {
        let mut store = small_store(4);
        let leaf = store.leaf_index(300);

        assert!(store.set_left(0, leaf).is_err());
    }

    #[test]
    fn width_that_cannot_address_capacity_is_rejected() {
        assert!(NodeStore::<u8, u8>::new(256, 2, 1.0, false, false, false).is_err());
        assert!(NodeStore::<u8, u8>::new(255, 2, 1.0, false, false, false).is_ok());
        assert!(NodeStore::<u8, u8>::new(4, 257, 1.0, false, false, false).is_err());
    }

    #[test]
    fn leaf_mass_defaults_to_one() {
        let mut store = small_store(4);
        let leaf = store.leaf_index(1);

        assert_eq!(store.get_leaf_mass(leaf), 1);

        store.increase_leaf_mass(leaf);
        assert_eq!(store.get_leaf_mass(leaf), 2);

        assert_eq!(store.decrease_leaf_mass(leaf), 1);
        assert_eq!(store.get_leaf_mass(leaf), 1);

        // Singleton removal reports zero.
        assert_eq!(store.decrease_leaf_mass(leaf), 0);
    }

    #[test]
    fn sequence_multiset_tracks_occurrences() {
        let mut store = small_store(4);

        store.add_leaf(2, 10);
        store.add_leaf(2, 10);
        store.add_leaf(2, 11);

        assert_eq!(store.sequence_count(2, 10), 2);
        store.remove_leaf(2, 10).unwrap();
        assert_eq!(store.sequence_count(2, 10), 1);

        assert!(matches!(
            store.remove_leaf(2, 99),
            Err(TreeError::MissingLeaf)
        ));
        assert!(matches!(
            store.remove_leaf(9, 10),
            Err(TreeError::MissingLeaf)
        ));
    }

    #[test]
    fn path_descends_by_cuts() {
        let mut store = small_store(4);
        let mut points = PointStore::new(2, 8);
        let a = points.add(&[-1.0, 0.0]).unwrap();
        let b = points.add(&[1.0, 0.0]).unwrap();

        // Manual two-leaf tree rooted at slot 0 cutting dimension 0 at 0.0.
        store.free.take();
        store.cut_dim[0] = 0;
        store.cut_value[0] = 0.0;
        store.set_left(0, store.leaf_index(a)).unwrap();
        store.set_right(0, store.leaf_index(b)).unwrap();
        store.mass[0] = 2;

        let path = store.get_path(0, &[2.0, 0.0]);

        assert_eq!(path[0], (0, store.capacity()));
        assert_eq!(path[1], (store.leaf_index(b), store.leaf_index(a)));

        let boxed = store.get_box(0, &points).unwrap();
        assert_eq!(boxed.min_values(), &[-1.0, 0.0]);
        assert_eq!(boxed.max_values(), &[1.0, 0.0]);
    }
}
