//! Filepath: src/visitor.rs
//!
//! Generic visitor descent over a tree.
//!
//! Two protocols share one cursor type, [`NodeView`]:
//!
//! - **Single visitor**: descend toward the leaf the cuts dictate, call
//!   `accept_leaf` there, then call `accept` at every interior node on the
//!   way back up with the view updated to that node.
//! - **Multi visitor**: at each interior node `trigger` decides whether to
//!   descend both sides with a cloned visitor and `combine` the results —
//!   the protocol behind algorithms that compare siblings, such as
//!   directional attribution.
//!
//! The traversal mutates the view in place between callbacks; visitors
//! must not retain it past their call.

use crate::boundingbox::BoundingBox;
use crate::nodestore::NodeStore;
use crate::pointstore::PointStoreView;
use crate::tree::TreeError;
use crate::width::IndexWidth;

/// Read-only callbacks invoked along a root-to-leaf descent.
pub trait Visitor {
    /// Called at each interior node on the way back up.
    fn accept(&mut self, view: &NodeView, depth: usize);

    /// Called once at the leaf the descent reaches.
    fn accept_leaf(&mut self, view: &NodeView, depth: usize);
}

/// A visitor that may fork at interior nodes and merge the results.
pub trait MultiVisitor: Visitor + Sized {
    /// Whether to descend both children at the viewed node.
    fn trigger(&self, view: &NodeView) -> bool;

    /// Fresh visitor state for the second branch.
    fn new_copy(&self) -> Self;

    /// Merge the second branch's state back in.
    fn combine(&mut self, other: Self);
}

/// Cursor over the current node of a traversal.
///
/// Carries the node's cut and mass, the leaf data once reached, the
/// probability that a random cut separates the query point from the
/// subtree below the current node, and the unvisited sibling's box
/// (materialized while stepping up).
#[derive(Clone, Debug)]
pub struct NodeView {
    current: usize,
    cut_dimension: usize,
    cut_value: f32,
    mass: usize,
    leaf_point: Vec<f32>,
    leaf_index: Option<u32>,
    duplicate: bool,
    probability_of_cut: f64,
    sibling_box: Option<BoundingBox>,

    /// Accumulator grown along the return path; used instead of per-node
    /// cache lookups when the cache is sparse.
    path_box: Option<BoundingBox>,
    use_path_box: bool,
}

impl NodeView {
    pub(crate) fn new(use_path_box: bool) -> Self {
        Self {
            current: 0,
            cut_dimension: 0,
            cut_value: 0.0,
            mass: 0,
            leaf_point: Vec::new(),
            leaf_index: None,
            duplicate: false,
            probability_of_cut: f64::MAX,
            sibling_box: None,
            path_box: None,
            use_path_box,
        }
    }

    #[inline]
    #[must_use]
    pub fn current_node(&self) -> usize {
        self.current
    }

    #[inline]
    #[must_use]
    pub fn cut_dimension(&self) -> usize {
        self.cut_dimension
    }

    #[inline]
    #[must_use]
    pub fn cut_value(&self) -> f32 {
        self.cut_value
    }

    #[inline]
    #[must_use]
    pub fn mass(&self) -> usize {
        self.mass
    }

    /// The point stored at the reached leaf.
    #[inline]
    #[must_use]
    pub fn leaf_point(&self) -> &[f32] {
        &self.leaf_point
    }

    /// Point-store index of the reached leaf.
    #[inline]
    #[must_use]
    pub fn leaf_point_index(&self) -> Option<u32> {
        self.leaf_index
    }

    /// Whether the query point bitwise equals the leaf point.
    #[inline]
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        self.duplicate
    }

    /// Probability that a random cut separates the query point from the
    /// subtree below the current node. `0` at a duplicate leaf, `1` at a
    /// novel leaf.
    #[inline]
    #[must_use]
    pub fn probability_of_cut(&self) -> f64 {
        self.probability_of_cut
    }

    /// Box of the unvisited sibling recorded by the last step up.
    #[inline]
    #[must_use]
    pub fn sibling_box(&self) -> Option<&BoundingBox> {
        self.sibling_box.as_ref()
    }

    pub(crate) fn set_leaf<C: IndexWidth, D: IndexWidth, P: PointStoreView>(
        &mut self,
        store: &NodeStore<C, D>,
        point_store: &P,
        leaf: usize,
        point: &[f32],
    ) {
        let point_index = store.point_index(leaf);

        self.current = leaf;
        self.mass = store.get_mass(leaf);
        self.leaf_index = Some(point_index);
        self.leaf_point = point_store.get(point_index).to_vec();
        self.duplicate = point_store.is_equal(point, point_index);
        self.probability_of_cut = if self.duplicate { 0.0 } else { 1.0 };
        self.sibling_box = None;

        if self.use_path_box {
            self.path_box = Some(BoundingBox::from_point(&self.leaf_point));
        }
    }

    pub(crate) fn set_current_only<C: IndexWidth, D: IndexWidth>(
        &mut self,
        store: &NodeStore<C, D>,
        node: usize,
    ) {
        self.current = node;
        self.mass = store.get_mass(node);

        if store.is_internal(node) {
            self.cut_dimension = store.cut_dimension(node);
            self.cut_value = store.cut_value(node);
        }
    }

    pub(crate) fn update_to_parent<C: IndexWidth, D: IndexWidth, P: PointStoreView>(
        &mut self,
        store: &mut NodeStore<C, D>,
        point_store: &P,
        parent: usize,
        sibling: usize,
        point: &[f32],
    ) -> Result<(), TreeError> {
        let sibling_box = store.get_box(sibling, point_store)?;

        self.probability_of_cut = match &mut self.path_box {
            Some(boxed) => {
                boxed.add_box(&sibling_box);
                boxed.probability_of_cut(point)
            }

            None => store.probability_of_cut(parent, point, point_store, None)?,
        };

        self.sibling_box = Some(sibling_box);
        self.current = parent;
        self.mass = store.get_mass(parent);
        self.cut_dimension = store.cut_dimension(parent);
        self.cut_value = store.cut_value(parent);
        Ok(())
    }
}

/// Single-visitor descent: down the cut-dictated path, `accept_leaf` at
/// the bottom, `accept` per interior node on the way up.
pub(crate) fn traverse_path_to_leaf<C, D, P, V>(
    store: &mut NodeStore<C, D>,
    point_store: &P,
    point: &[f32],
    visitor: &mut V,
    view: &mut NodeView,
    node: usize,
    depth: usize,
) -> Result<(), TreeError>
where
    C: IndexWidth,
    D: IndexWidth,
    P: PointStoreView,
    V: Visitor,
{
    if store.is_leaf(node) {
        view.set_leaf(store, point_store, node, point);
        visitor.accept_leaf(view, depth);
        return Ok(());
    }

    if !store.is_internal(node) {
        return Err(TreeError::ContractViolation("incomplete state"));
    }

    let left = store.left_index(node);
    let right = store.right_index(node);
    let (next, sibling) = if store.left_of(node, point) {
        (left, right)
    } else {
        (right, left)
    };

    traverse_path_to_leaf(store, point_store, point, visitor, view, next, depth + 1)?;
    view.update_to_parent(store, point_store, node, sibling, point)?;
    visitor.accept(view, depth);
    Ok(())
}

/// Multi-visitor descent: forked at every node whose `trigger` fires.
pub(crate) fn traverse_tree_multi<C, D, P, M>(
    store: &mut NodeStore<C, D>,
    point_store: &P,
    point: &[f32],
    visitor: &mut M,
    view: &mut NodeView,
    node: usize,
    depth: usize,
) -> Result<(), TreeError>
where
    C: IndexWidth,
    D: IndexWidth,
    P: PointStoreView,
    M: MultiVisitor,
{
    if store.is_leaf(node) {
        view.set_leaf(store, point_store, node, point);
        visitor.accept_leaf(view, depth);
        return Ok(());
    }

    if !store.is_internal(node) {
        return Err(TreeError::ContractViolation("incomplete state"));
    }

    let left = store.left_index(node);
    let right = store.right_index(node);

    view.set_current_only(store, node);

    if visitor.trigger(view) {
        traverse_tree_multi(store, point_store, point, visitor, view, left, depth + 1)?;

        let mut forked = visitor.new_copy();

        view.set_current_only(store, right);
        traverse_tree_multi(store, point_store, point, &mut forked, view, right, depth + 1)?;
        view.update_to_parent(store, point_store, node, left, point)?;
        visitor.combine(forked);
    } else if store.left_of(node, point) {
        traverse_tree_multi(store, point_store, point, visitor, view, left, depth + 1)?;
        view.update_to_parent(store, point_store, node, right, point)?;
    } else {
        traverse_tree_multi(store, point_store, point, visitor, view, right, depth + 1)?;
        view.update_to_parent(store, point_store, node, left, point)?;
    }

    visitor.accept(view, depth);
    Ok(())
}
