//! Filepath: src/scoring.rs
//!
//! Default scalar scoring policies.
//!
//! The traversal is parameterized by three scalar functions; these are the
//! standard choices. Expected-depth intuition: an isolated point sits at
//! depth O(log n), so `1 / (depth + 1)` is large exactly when a point
//! separates early.

use crate::cut::CutSource;
use crate::pointstore::PointStoreView;
use crate::tree::{RandomCutTree, TreeError};

/// Score contribution of a leaf whose point equals the query.
#[inline]
#[must_use]
pub fn default_score_seen(depth: f64, mass: f64) -> f64 {
    1.0 / (depth + (mass + 1.0).log2())
}

/// Score contribution of a novel point separated at `depth`.
#[inline]
#[must_use]
pub fn default_score_unseen(depth: f64, _mass: f64) -> f64 {
    1.0 / (depth + 1.0)
}

/// Damping applied when a duplicate is observed: frequent duplicates pull
/// the score toward zero.
#[inline]
#[must_use]
pub fn default_damp(mass: f64, tree_mass: f64) -> f64 {
    1.0 - mass / (2.0 * tree_mass)
}

/// Score `point` with the default policies and no ignored mass.
pub fn anomaly_score<S: CutSource, P: PointStoreView>(
    tree: &mut RandomCutTree<S>,
    store: &P,
    point: &[f32],
) -> Result<f64, TreeError> {
    let tree_mass = tree.mass() as f64;

    tree.score(
        point,
        0,
        store,
        default_score_seen,
        default_score_unseen,
        move |mass| default_damp(mass, tree_mass),
    )
}
