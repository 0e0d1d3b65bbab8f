//! Filepath: src/pointstore.rs
//!
//! Point storage behind the tree's read-only view.
//!
//! The tree never owns points: leaves reference a point index resolved
//! through [`PointStoreView`], and reference-count changes are mediated by
//! the update coordinator, never by the tree. [`PointStore`] is the
//! reference implementation: content-addressed (exact-bit duplicates share
//! one slot), reference-counted, with freed slots reused smallest-first.

use std::collections::HashMap;

use crate::intervals::IntervalManager;
use crate::tree::TreeError;

/// Read-only view of stored points, as consumed by a tree.
pub trait PointStoreView {
    /// Vector length of every stored point.
    fn dimensions(&self) -> usize;

    /// Resolve a point index to its coordinates.
    fn get(&self, point_index: u32) -> &[f32];

    /// The point scaled by `scalar`; convenience for center-of-mass
    /// accounting at leaves.
    fn get_scaled_point(&self, point_index: u32, scalar: f64) -> Vec<f32> {
        self.get(point_index)
            .iter()
            .map(|v| (f64::from(*v) * scalar) as f32)
            .collect()
    }

    /// Bitwise per-coordinate equality between `point` and the stored
    /// point.
    fn is_equal(&self, point: &[f32], point_index: u32) -> bool {
        let stored = self.get(point_index);

        stored.len() == point.len()
            && stored
                .iter()
                .zip(point)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

/// Bit-pattern key for content addressing; `f32` is not hashable, its bit
/// pattern is.
fn content_key(point: &[f32]) -> Vec<u32> {
    point.iter().map(|v| v.to_bits()).collect()
}

/// Content-addressed, reference-counted point storage.
///
/// # Invariants
///
/// - A slot is live iff its reference count is positive.
/// - Live slots with equal bit patterns do not exist: `add` of a duplicate
///   bumps the existing slot instead.
#[derive(Clone, Debug)]
pub struct PointStore {
    dimensions: usize,
    data: Vec<f32>,
    ref_count: Vec<u32>,
    free: IntervalManager,
    index_of: HashMap<Vec<u32>, u32>,
}

impl PointStore {
    /// A store for `capacity` points of the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize, capacity: usize) -> Self {
        Self {
            dimensions,
            data: vec![0.0; dimensions * capacity],
            ref_count: vec![0; capacity],
            free: IntervalManager::new(capacity),
            index_of: HashMap::new(),
        }
    }

    /// Number of live points.
    #[must_use]
    pub fn size(&self) -> usize {
        self.free.capacity() - self.free.size()
    }

    /// Store a point with an initial reference count of one, or bump the
    /// count of an identical live point.
    pub fn add(&mut self, point: &[f32]) -> Result<u32, TreeError> {
        if point.len() != self.dimensions {
            return Err(TreeError::ContractViolation("point dimension mismatch"));
        }

        let key = content_key(point);

        if let Some(&index) = self.index_of.get(&key) {
            self.ref_count[index as usize] += 1;
            return Ok(index);
        }

        let index = self.free.take().ok_or(TreeError::StoreFull)?;
        let base = index as usize * self.dimensions;

        self.data[base..base + self.dimensions].copy_from_slice(point);
        self.ref_count[index as usize] = 1;
        self.index_of.insert(key, index);
        Ok(index)
    }

    pub fn increment_ref_count(&mut self, point_index: u32) -> Result<(), TreeError> {
        let count = self
            .ref_count
            .get_mut(point_index as usize)
            .ok_or(TreeError::ContractViolation("point index out of range"))?;

        if *count == 0 {
            return Err(TreeError::ContractViolation("point is not live"));
        }

        *count += 1;
        Ok(())
    }

    /// Drop one reference; the slot is reclaimed when the count reaches
    /// zero.
    pub fn decrement_ref_count(&mut self, point_index: u32) -> Result<(), TreeError> {
        let count = self
            .ref_count
            .get_mut(point_index as usize)
            .ok_or(TreeError::ContractViolation("point index out of range"))?;

        if *count == 0 {
            return Err(TreeError::ContractViolation("point is not live"));
        }

        *count -= 1;

        if *count == 0 {
            let base = point_index as usize * self.dimensions;
            let key = content_key(&self.data[base..base + self.dimensions]);

            self.index_of.remove(&key);
            self.free.release(point_index)?;
        }

        Ok(())
    }

    /// Current reference count of a slot.
    #[must_use]
    pub fn ref_count(&self, point_index: u32) -> u32 {
        self.ref_count
            .get(point_index as usize)
            .copied()
            .unwrap_or(0)
    }
}

impl PointStoreView for PointStore {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn get(&self, point_index: u32) -> &[f32] {
        let base = point_index as usize * self.dimensions;
        &self.data[base..base + self.dimensions]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_deduplicates_identical_points() {
        let mut store = PointStore::new(2, 4);

        let a = store.add(&[1.0, 2.0]).unwrap();
        let b = store.add(&[1.0, 2.0]).unwrap();

        assert_eq!(a, b);
        assert_eq!(store.ref_count(a), 2);
        assert_eq!(store.size(), 1);
    }

    #[test]
    fn slots_are_reclaimed_at_zero_references() {
        let mut store = PointStore::new(1, 2);

        let a = store.add(&[1.0]).unwrap();
        let b = store.add(&[2.0]).unwrap();
        assert!(store.add(&[3.0]).is_err());

        store.decrement_ref_count(a).unwrap();
        assert_eq!(store.ref_count(a), 0);

        // The freed slot is reused, and the content key no longer matches.
        let c = store.add(&[3.0]).unwrap();
        assert_eq!(c, a);
        assert_eq!(store.get(b), &[2.0]);
    }

    #[test]
    fn dimension_mismatch_is_a_contract_violation() {
        let mut store = PointStore::new(2, 2);

        assert!(matches!(
            store.add(&[1.0]),
            Err(TreeError::ContractViolation(_))
        ));
    }

    #[test]
    fn over_decrement_is_rejected() {
        let mut store = PointStore::new(1, 2);

        let a = store.add(&[1.0]).unwrap();
        store.decrement_ref_count(a).unwrap();

        assert!(store.decrement_ref_count(a).is_err());
        assert!(store.increment_ref_count(a).is_err());
    }

    #[test]
    fn scaled_point_multiplies_coordinates() {
        let mut store = PointStore::new(2, 2);

        let a = store.add(&[1.5, -2.0]).unwrap();
        assert_eq!(store.get_scaled_point(a, 2.0), vec![3.0, -4.0]);
    }

    #[test]
    fn is_equal_compares_bit_patterns() {
        let mut store = PointStore::new(1, 2);

        let a = store.add(&[1.0]).unwrap();
        assert!(store.is_equal(&[1.0], a));
        assert!(!store.is_equal(&[1.0 + f32::EPSILON], a));
        assert!(!store.is_equal(&[1.0, 1.0], a));
    }
}
