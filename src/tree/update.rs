//! Filepath: src/tree/update.rs
//!
//! Insert and delete engine.
//!
//! Insertion descends to a leaf, then walks back up growing the box of the
//! subtree it would displace. One cut is drawn per level on `box ∪ point`;
//! the highest level whose cut separates the point from that level's box
//! wins — an upward scan that yields the same distribution as the
//! top-down "split at the first separating level from the root", because
//! the draws at different levels are independent and the leaf level always
//! separates. The winning level's edge is split with a fresh interior
//! node, and the ancestors above are fixed up.
//!
//! Deletion descends to the leaf, decrements its duplicate count, and —
//! when the count reaches zero — promotes the sibling into the parent's
//! place, releases the parent slot, and fixes the ancestors, rebuilding
//! cached boxes only until one strictly contains the removed point.

use crate::boundingbox::BoundingBox;
use crate::cut::{separates, Cut, CutSource};
use crate::pointstore::PointStoreView;
use crate::tracing_helpers::{debug_log, trace_log, warn_log};
use crate::width::IndexWidth;

use super::{TreeCore, TreeError, UpdateResult};

impl<C: IndexWidth, D: IndexWidth, S: CutSource> TreeCore<C, D, S> {
    /// Sliding-window update. The window holds at most `capacity + 1`
    /// occurrences; when full, the oldest sequence is deleted before the
    /// new occurrence is inserted, so an insert never needs more interior
    /// slots than the arena has.
    pub fn update<P: PointStoreView>(
        &mut self,
        point_index: u32,
        sequence_index: u64,
        store: &P,
    ) -> Result<UpdateResult, TreeError> {
        let oldest = if self.window.len() > self.store.capacity() {
            self.window
                .first_key_value()
                .map(|(&sequence, &point)| (sequence, point))
        } else {
            None
        };

        let evicted = match oldest {
            Some((oldest_sequence, oldest_point)) => {
                debug_log!(oldest_sequence, oldest_point, "evicting oldest occurrence");

                let removed = self.delete_point(oldest_point, oldest_sequence, store)?;

                Some((self.store.leaf_index(removed), removed))
            }

            None => None,
        };

        let inserted_leaf = self.add_point(point_index, sequence_index, store)?;

        Ok(UpdateResult {
            inserted_leaf,
            inserted_point: self.store.point_index(inserted_leaf),
            evicted_leaf: evicted.map(|(leaf, _)| leaf),
            evicted_point: evicted.map(|(_, point)| point),
        })
    }

    /// Insert one occurrence of the stored point.
    ///
    /// Returns the leaf the occurrence landed on — the existing leaf when
    /// the point bitwise equals one already in the tree, a fresh leaf
    /// otherwise.
    pub fn add_point<P: PointStoreView>(
        &mut self,
        point_index: u32,
        sequence_index: u64,
        store: &P,
    ) -> Result<usize, TreeError> {
        if store.dimensions() != self.store.dimensions() {
            return Err(TreeError::ContractViolation("point dimension mismatch"));
        }

        if self.window.contains_key(&sequence_index) {
            return Err(TreeError::ContractViolation("duplicate sequence index"));
        }

        let Some(root) = self.root else {
            let leaf = self.store.add_leaf(point_index, sequence_index);

            self.root = Some(leaf);
            self.window.insert(sequence_index, point_index);
            trace_log!(leaf, "first occurrence becomes the root");
            return Ok(leaf);
        };

        let point: Vec<f32> = store.get(point_index).to_vec();
        let path = self.store.get_path(root, &point);
        let levels = path.len();
        let (leaf_node, _) = path[levels - 1];

        if !self.store.is_leaf(leaf_node) {
            return Err(TreeError::ContractViolation("descent must end at a leaf"));
        }

        let old_index = self.store.point_index(leaf_node);

        if store.is_equal(&point, old_index) {
            // Duplicate: the occurrence shares the existing leaf; ancestors
            // gain mass, boxes cannot change shape.
            self.store.add_leaf(old_index, sequence_index);
            self.store.increase_leaf_mass(leaf_node);

            let mut ancestors = path[..levels - 1].to_vec();

            self.store.manage_ancestors_add(&mut ancestors, &point, store)?;
            self.window.insert(sequence_index, old_index);
            trace_log!(leaf_node, "duplicate occurrence absorbed at leaf");
            return Ok(leaf_node);
        }

        // Novel point: draw one cut per level from the leaf up, remembering
        // the highest separating level.
        let mut subtree_box = BoundingBox::from_point(store.get(old_index));
        let mut chosen: Option<(Cut, BoundingBox, usize)> = None;

        for level in (0..levels).rev() {
            let (_, sibling) = path[level];
            let cut = self.cut_source.draw_cut(&point, &subtree_box);

            if separates(&cut, &point, &subtree_box) {
                chosen = Some((cut, subtree_box.clone(), level));
            }

            if level > 0 {
                let parent = path[level - 1].0;

                self.store
                    .grow_node_box(&mut subtree_box, store, parent, sibling)?;
            }
        }

        let (cut, split_box, level) = chosen.ok_or(TreeError::ContractViolation(
            "no separating cut over a non-degenerate point",
        ))?;
        let displaced = path[level].0;
        let parent = if level > 0 { Some(path[level - 1].0) } else { None };

        let (slot, leaf) = self.store.add_node(
            parent,
            displaced,
            &point,
            point_index,
            sequence_index,
            cut,
            &split_box,
            store,
        )?;

        if parent.is_none() {
            self.root = Some(slot);
        }

        let mut ancestors = path[..level].to_vec();

        self.store.manage_ancestors_add(&mut ancestors, &point, store)?;
        self.window.insert(sequence_index, point_index);
        Ok(leaf)
    }

    /// Remove one occurrence of the stored point.
    ///
    /// Returns the canonical point index of the leaf the occurrence was
    /// removed from, which may differ from `point_index` when two store
    /// slots hold bitwise-equal content.
    pub fn delete_point<P: PointStoreView>(
        &mut self,
        point_index: u32,
        sequence_index: u64,
        store: &P,
    ) -> Result<u32, TreeError> {
        let root = self
            .root
            .ok_or(TreeError::ContractViolation("delete on an empty tree"))?;
        let point: Vec<f32> = store.get(point_index).to_vec();

        if self.store.is_leaf(root) {
            let old_index = self.store.point_index(root);

            if !store.is_equal(&point, old_index) {
                return Err(TreeError::MissingLeaf);
            }

            if self.store.sequences_enabled() {
                self.store.remove_leaf(old_index, sequence_index)?;
            }

            if self.window.remove(&sequence_index).is_none() {
                warn_log!(sequence_index, "sequence missing from the occurrence window");
            }

            if self.store.decrease_leaf_mass(root) == 0 {
                self.root = None;
                trace_log!("tree emptied");
            }

            return Ok(old_index);
        }

        let mut path = self.store.get_path(root, &point);
        let Some((leaf_node, _)) = path.pop() else {
            return Err(TreeError::ContractViolation("empty descent path"));
        };

        if !self.store.is_leaf(leaf_node) {
            return Err(TreeError::ContractViolation("descent must end at a leaf"));
        }

        let old_index = self.store.point_index(leaf_node);

        if !store.is_equal(&point, old_index) {
            return Err(TreeError::MissingLeaf);
        }

        if self.store.sequences_enabled() {
            self.store.remove_leaf(old_index, sequence_index)?;
        }

        if self.window.remove(&sequence_index).is_none() {
            warn_log!(sequence_index, "sequence missing from the occurrence window");
        }

        if self.store.decrease_leaf_mass(leaf_node) == 0 {
            // Last occurrence: unlink the leaf, promote its sibling, and
            // release the parent slot.
            let Some((parent, _)) = path.pop() else {
                return Err(TreeError::ContractViolation("leaf has no parent entry"));
            };
            let grandparent = path.last().map(|entry| entry.0);
            let sibling = self
                .store
                .replace_parent_by_sibling(grandparent, parent, leaf_node)?;

            if grandparent.is_none() {
                self.root = Some(sibling);
            }

            self.store.delete_internal_node(parent)?;
            self.store.manage_ancestors_delete(&mut path, &point, store)?;
        } else {
            self.store.manage_ancestors_delete(&mut path, &point, store)?;
        }

        Ok(old_index)
    }

    /// Replay one occurrence into a tree reconstructed from persisted
    /// columns.
    ///
    /// The structural skeleton stores interior nodes only; descent ends
    /// either at the sentinel (the occurrence's leaf slot, spliced in
    /// here) or at a leaf replayed earlier (a duplicate, absorbed by
    /// mass). Masses, sequence bookkeeping, and the occurrence window are
    /// rebuilt as replays arrive; boxes stay lazy.
    pub fn add_to_partial_tree<P: PointStoreView>(
        &mut self,
        point_index: u32,
        sequence_index: u64,
        store: &P,
    ) -> Result<usize, TreeError> {
        let root = self
            .root
            .ok_or(TreeError::ContractViolation("partial tree requires a root"))?;
        let point: Vec<f32> = store.get(point_index).to_vec();

        if self.store.is_leaf(root) {
            let old_index = self.store.point_index(root);

            if !store.is_equal(&point, old_index) {
                return Err(TreeError::ContractViolation(
                    "replayed point does not match the leaf root",
                ));
            }

            // The structural root already accounts for one occurrence.
            if !self.window.is_empty() {
                self.store.increase_leaf_mass(root);
            }

            self.store.add_leaf(old_index, sequence_index);
            self.window.insert(sequence_index, old_index);
            return Ok(root);
        }

        let path = self.store.get_path(root, &point);
        let levels = path.len();
        let (end, _) = path[levels - 1];
        let mut ancestors = path[..levels - 1].to_vec();

        if self.store.is_leaf(end) {
            let old_index = self.store.point_index(end);

            if !store.is_equal(&point, old_index) {
                return Err(TreeError::ContractViolation(
                    "replayed point collides with a different leaf",
                ));
            }

            self.store.add_leaf(old_index, sequence_index);
            self.store.increase_leaf_mass(end);
            self.store.manage_ancestors_add(&mut ancestors, &point, store)?;
            self.window.insert(sequence_index, old_index);
            return Ok(end);
        }

        if self.store.is_internal(end) {
            return Err(TreeError::ContractViolation("descent ended inside the tree"));
        }

        // Sentinel: this occurrence's leaf slot.
        let Some(&(parent, _)) = ancestors.last() else {
            return Err(TreeError::ContractViolation("sentinel at the root"));
        };
        let leaf = self.store.add_leaf(point_index, sequence_index);

        self.store.attach_leaf(parent, leaf, &point)?;
        self.store.manage_ancestors_add(&mut ancestors, &point, store)?;
        self.window.insert(sequence_index, point_index);
        Ok(leaf)
    }
}
