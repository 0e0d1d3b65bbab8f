//! Filepath: src/boxcache.rs
//!
//! Partial bounding-box cache for interior-node slots.
//!
//! A fraction `f` of the arena's slots carry a cached bounding box and
//! range sum. With `limit = floor(f * capacity)`, exactly the slots
//! `s < limit` are cacheable; [`BoxCache::translate`] is the identity on
//! those and a miss on every other slot. Because the free-slot manager
//! hands out the smallest index first, low (cacheable) slots are the ones
//! preferentially in use.
//!
//! # Layout
//!
//! One flat `f32` array of length `2 * dimensions * limit`: for slot `s`,
//! the minimum corner occupies `[2*s*d, 2*s*d + d)` and the maximum corner
//! the following `d` cells. A parallel `f64` array holds each slot's range
//! sum, where `0.0` doubles as the "slot empty" marker — a legitimate box
//! with zero range (a single point, or all duplicates) is indistinguishable
//! from empty and is simply reconstructed on demand.
//!
//! # Range-sum reproducibility
//!
//! [`BoxCache::check_contains_and_add_point`] reports "the point was
//! already contained" by comparing a freshly recomputed range sum against
//! the stored one. That comparison is exact: every writer stores a sum
//! produced by the same left-to-right summation over `f32` differences
//! widened to `f64`, so re-summing a box that did not change reproduces
//! the stored value bit-for-bit.

use crate::boundingbox::BoundingBox;

/// Cache of bounding boxes for interior slots `s < limit`.
#[derive(Clone, Debug)]
pub struct BoxCache {
    capacity: usize,
    dimensions: usize,
    fraction: f64,

    /// Min corner then max corner, `2 * dimensions` cells per cached slot.
    box_data: Vec<f32>,

    /// Range sum per cached slot; `0.0` marks the slot empty.
    range_sum: Vec<f64>,
}

impl BoxCache {
    #[must_use]
    pub fn new(capacity: usize, dimensions: usize, fraction: f64) -> Self {
        debug_assert!((0.0..=1.0).contains(&fraction));

        let limit: usize = (fraction * capacity as f64).floor() as usize;

        Self {
            capacity,
            dimensions,
            fraction,
            box_data: vec![0.0; 2 * dimensions * limit],
            range_sum: vec![0.0; limit],
        }
    }

    /// Fraction of the arena currently covered.
    #[inline]
    #[must_use]
    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    /// Number of cacheable slots.
    #[inline]
    #[must_use]
    pub fn limit(&self) -> usize {
        self.range_sum.len()
    }

    /// Map an arena slot to its cache position, or `None` when the slot is
    /// outside the cached window.
    #[inline]
    #[must_use]
    pub fn translate(&self, slot: usize) -> Option<usize> {
        (slot < self.range_sum.len()).then_some(slot)
    }

    /// Whether the slot is cacheable and holds a non-empty entry.
    #[inline]
    #[must_use]
    pub fn is_filled(&self, slot: usize) -> bool {
        self.translate(slot)
            .is_some_and(|idx| self.range_sum[idx] != 0.0)
    }

    #[inline]
    fn base(&self, idx: usize) -> usize {
        2 * idx * self.dimensions
    }

    /// Write a box (corners and range sum) into the cache slot.
    pub fn copy_box_to_data(&mut self, idx: usize, bounding_box: &BoundingBox) {
        let base: usize = self.base(idx);
        let mid: usize = base + self.dimensions;

        self.box_data[base..mid].copy_from_slice(bounding_box.min_values());
        self.box_data[mid..mid + self.dimensions].copy_from_slice(bounding_box.max_values());
        self.range_sum[idx] = bounding_box.range_sum();
    }

    /// Materialize the stored box for a cache position.
    #[must_use]
    pub fn box_from_data(&self, idx: usize) -> BoundingBox {
        let base: usize = self.base(idx);
        let mid: usize = base + self.dimensions;

        BoundingBox::new(
            &self.box_data[base..mid],
            &self.box_data[mid..mid + self.dimensions],
        )
    }

    /// Mark a cache position empty.
    pub fn clear(&mut self, idx: usize) {
        self.range_sum[idx] = 0.0;
    }

    /// Fold `point` into the cached box and report whether it was already
    /// contained.
    ///
    /// Returns `true` iff the slot is cached, non-empty, and folding the
    /// point in left the range sum unchanged — which is exactly "the point
    /// was inside or on the boundary". Returns `false` on a cache miss or
    /// an empty slot. The delete-path ancestor fix-up uses the `true`
    /// return to stop early.
    pub fn check_contains_and_add_point(&mut self, slot: usize, point: &[f32]) -> bool {
        let Some(idx) = self.translate(slot) else {
            return false;
        };

        if self.range_sum[idx] == 0.0 {
            return false;
        }

        let base: usize = self.base(idx);
        let mid: usize = base + self.dimensions;

        for i in 0..self.dimensions {
            self.box_data[base + i] = self.box_data[base + i].min(point[i]);
        }

        for i in 0..self.dimensions {
            self.box_data[mid + i] = self.box_data[mid + i].max(point[i]);
        }

        let mut recomputed: f64 = 0.0;

        for i in 0..self.dimensions {
            recomputed += f64::from(self.box_data[mid + i] - self.box_data[base + i]);
        }

        let contained: bool = self.range_sum[idx] == recomputed;
        self.range_sum[idx] = recomputed;
        contained
    }

    /// Whether the cached box strictly contains `point` (strict inequality
    /// on both sides in every dimension).
    ///
    /// Misses return `false`; callers check [`BoxCache::is_filled`] when
    /// emptiness matters.
    #[must_use]
    pub fn check_strictly_contains(&self, slot: usize, point: &[f32]) -> bool {
        let Some(idx) = self.translate(slot) else {
            return false;
        };

        let base: usize = self.base(idx);
        let mid: usize = base + self.dimensions;

        for i in 0..self.dimensions {
            if point[i] >= self.box_data[mid + i] || self.box_data[base + i] >= point[i] {
                return false;
            }
        }

        true
    }

    /// Probability of cut computed directly over the stored corner data.
    ///
    /// Only meaningful for a filled slot; `idx` is a cache position from
    /// [`BoxCache::translate`].
    #[must_use]
    pub fn probability_of_cut(&self, idx: usize, point: &[f32]) -> f64 {
        let base: usize = self.base(idx);
        let mid: usize = base + self.dimensions;

        let mut min_excess: f64 = 0.0;
        let mut max_excess: f64 = 0.0;

        for i in 0..self.dimensions {
            min_excess += f64::from(self.box_data[base + i] - point[i]).max(0.0);
        }

        for i in 0..self.dimensions {
            max_excess += f64::from(point[i] - self.box_data[mid + i]).max(0.0);
        }

        let excess = min_excess + max_excess;

        if excess == 0.0 {
            return 0.0;
        }

        excess / (self.range_sum[idx] + excess)
    }

    /// Reallocate for a new coverage fraction, preserving entries up to the
    /// new limit. Entries revealed by growth start empty.
    pub fn resize(&mut self, fraction: f64) {
        debug_assert!((0.0..=1.0).contains(&fraction));

        let limit: usize = (fraction * self.capacity as f64).floor() as usize;

        self.box_data.resize(2 * self.dimensions * limit, 0.0);
        self.range_sum.resize(limit, 0.0);
        self.fraction = fraction;
    }
}
