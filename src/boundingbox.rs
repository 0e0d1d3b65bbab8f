//! Filepath: src/boundingbox.rs
//!
//! Axis-aligned bounding box over `f32` coordinates with a cached range
//! sum.
//!
//! The range sum — the sum over all dimensions of `max - min` — is the
//! normalizer for cut probabilities and is recomputed eagerly on every
//! mutation so reads stay O(1). Summation is always left-to-right over
//! the dimensions: the box cache relies on the re-summed value being
//! bit-for-bit reproducible (see `boxcache`).

/// An axis-aligned box: per-dimension minimum and maximum plus the range
/// sum `sum_k (max[k] - min[k])`.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundingBox {
    min: Vec<f32>,
    max: Vec<f32>,
    range_sum: f64,
}

impl BoundingBox {
    /// Build a box from explicit corner vectors.
    ///
    /// # Panics
    ///
    /// Debug-asserts that the corners have equal length and `min <= max`
    /// per dimension.
    #[must_use]
    pub fn new(min: &[f32], max: &[f32]) -> Self {
        debug_assert_eq!(min.len(), max.len());
        debug_assert!(min.iter().zip(max).all(|(a, b)| a <= b));

        let mut boxed = Self {
            min: min.to_vec(),
            max: max.to_vec(),
            range_sum: 0.0,
        };
        boxed.recompute_range_sum();
        boxed
    }

    /// The degenerate box containing a single point.
    #[must_use]
    pub fn from_point(point: &[f32]) -> Self {
        Self {
            min: point.to_vec(),
            max: point.to_vec(),
            range_sum: 0.0,
        }
    }

    #[inline]
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.min.len()
    }

    #[inline]
    #[must_use]
    pub fn min_values(&self) -> &[f32] {
        &self.min
    }

    #[inline]
    #[must_use]
    pub fn max_values(&self) -> &[f32] {
        &self.max
    }

    #[inline]
    #[must_use]
    pub fn min_value(&self, dimension: usize) -> f32 {
        self.min[dimension]
    }

    #[inline]
    #[must_use]
    pub fn max_value(&self, dimension: usize) -> f32 {
        self.max[dimension]
    }

    /// Cached `sum_k (max[k] - min[k])`.
    #[inline]
    #[must_use]
    pub fn range_sum(&self) -> f64 {
        self.range_sum
    }

    fn recompute_range_sum(&mut self) {
        let mut sum: f64 = 0.0;

        for (lo, hi) in self.min.iter().zip(&self.max) {
            sum += f64::from(hi - lo);
        }

        self.range_sum = sum;
    }

    /// Grow the box to contain `point`.
    pub fn add_point(&mut self, point: &[f32]) {
        debug_assert_eq!(point.len(), self.min.len());

        for (lo, p) in self.min.iter_mut().zip(point) {
            *lo = lo.min(*p);
        }

        for (hi, p) in self.max.iter_mut().zip(point) {
            *hi = hi.max(*p);
        }

        self.recompute_range_sum();
    }

    /// Grow the box to contain `other`.
    pub fn add_box(&mut self, other: &BoundingBox) {
        debug_assert_eq!(other.dimensions(), self.dimensions());

        for (lo, o) in self.min.iter_mut().zip(&other.min) {
            *lo = lo.min(*o);
        }

        for (hi, o) in self.max.iter_mut().zip(&other.max) {
            *hi = hi.max(*o);
        }

        self.recompute_range_sum();
    }

    /// Collapse the box to a single point in place.
    pub fn replace_with_point(&mut self, point: &[f32]) {
        debug_assert_eq!(point.len(), self.min.len());

        self.min.copy_from_slice(point);
        self.max.copy_from_slice(point);
        self.range_sum = 0.0;
    }

    /// Overwrite this box with the contents of `other`.
    pub fn copy_from(&mut self, other: &BoundingBox) {
        debug_assert_eq!(other.dimensions(), self.dimensions());

        self.min.copy_from_slice(&other.min);
        self.max.copy_from_slice(&other.max);
        self.range_sum = other.range_sum;
    }

    /// Whether the point lies inside or on the boundary of the box.
    #[must_use]
    pub fn contains(&self, point: &[f32]) -> bool {
        self.min
            .iter()
            .zip(&self.max)
            .zip(point)
            .all(|((lo, hi), p)| *lo <= *p && *p <= *hi)
    }

    /// Probability that a random cut on `self ∪ point` separates `point`
    /// from `self`.
    ///
    /// Returns `excess / (range_sum + excess)` where `excess` is the total
    /// distance by which the point sticks out of the box, or `0` when the
    /// point is contained.
    #[must_use]
    pub fn probability_of_cut(&self, point: &[f32]) -> f64 {
        debug_assert_eq!(point.len(), self.min.len());

        let mut min_excess: f64 = 0.0;
        let mut max_excess: f64 = 0.0;

        for (lo, p) in self.min.iter().zip(point) {
            min_excess += f64::from(lo - p).max(0.0);
        }

        for (hi, p) in self.max.iter().zip(point) {
            max_excess += f64::from(p - hi).max(0.0);
        }

        let excess = min_excess + max_excess;

        if excess == 0.0 {
            return 0.0;
        }

        excess / (self.range_sum + excess)
    }
}
