//! Filepath: src/cut.rs
//!
//! Cut-drawing policy for tree updates.
//!
//! The update engine decides *where* a new interior node goes; the policy
//! behind [`CutSource`] decides *which* cut to try at each candidate
//! level. Keeping the policy behind a trait keeps the engine deterministic
//! and testable — tests drive it with scripted cuts, production uses
//! [`RandomCutSource`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::boundingbox::BoundingBox;

/// A `(dimension, value)` pair splitting a bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cut {
    pub dimension: usize,
    pub value: f32,
}

/// Supplier of candidate cuts for the insertion walk.
///
/// `draw_cut` receives the query point and the bounding box of the subtree
/// being displaced; the cut must lie within the combined extent of
/// `bounding_box ∪ point`.
pub trait CutSource {
    fn draw_cut(&mut self, point: &[f32], bounding_box: &BoundingBox) -> Cut;
}

/// The standard random policy: the cut dimension is chosen with
/// probability proportional to the combined range of `box ∪ point` on that
/// dimension, and the cut value uniformly within that range.
#[derive(Debug)]
pub struct RandomCutSource {
    rng: StdRng,
}

impl RandomCutSource {
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl CutSource for RandomCutSource {
    fn draw_cut(&mut self, point: &[f32], bounding_box: &BoundingBox) -> Cut {
        let factor: f64 = self.rng.gen::<f64>();
        cut_for_factor(factor, point, bounding_box)
    }
}

/// Deterministic cut computation from a uniform `[0, 1)` draw.
///
/// Walks the dimensions accumulating combined ranges until the scaled draw
/// falls inside one; the remainder becomes the offset of the cut value
/// within that dimension's range. A value landing exactly on the combined
/// maximum is nudged one ulp down so the maximal point still falls on the
/// right side of the cut.
pub(crate) fn cut_for_factor(factor: f64, point: &[f32], bounding_box: &BoundingBox) -> Cut {
    debug_assert!((0.0..1.0).contains(&factor));

    let mut total_range: f64 = 0.0;

    for (i, p) in point.iter().enumerate() {
        let lo = bounding_box.min_value(i).min(*p);
        let hi = bounding_box.max_value(i).max(*p);
        total_range += f64::from(hi - lo);
    }

    debug_assert!(
        total_range > 0.0,
        "cut requested on a degenerate combined box"
    );

    let mut break_point: f64 = factor * total_range;

    for (i, p) in point.iter().enumerate() {
        let lo = bounding_box.min_value(i).min(*p);
        let hi = bounding_box.max_value(i).max(*p);
        let gap = f64::from(hi - lo);

        if break_point <= gap && gap > 0.0 {
            let mut value = (f64::from(lo) + break_point) as f32;

            if value >= hi {
                value = hi.next_down();
            }

            return Cut {
                dimension: i,
                value,
            };
        }

        break_point -= gap;
    }

    // Floating-point slack can leave a sliver of break_point after the last
    // positive gap; fall back to the last dimension with extent.
    let dimension = (0..point.len())
        .rev()
        .find(|&i| {
            bounding_box.max_value(i).max(point[i]) > bounding_box.min_value(i).min(point[i])
        })
        .unwrap_or(0);
    let hi = bounding_box.max_value(dimension).max(point[dimension]);

    Cut {
        dimension,
        value: hi.next_down(),
    }
}

/// Whether the cut puts `point` strictly on one side and the entire box on
/// the other.
pub(crate) fn separates(cut: &Cut, point: &[f32], bounding_box: &BoundingBox) -> bool {
    let p = point[cut.dimension];

    (p <= cut.value && bounding_box.min_value(cut.dimension) > cut.value)
        || (p > cut.value && bounding_box.max_value(cut.dimension) <= cut.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factor_walks_dimensions_by_range() {
        // Combined box over point and box: ranges 2.0 and 4.0.
        let boxed = BoundingBox::new(&[0.0, 0.0], &[2.0, 3.0]);
        let point = [1.0, 4.0];

        let low = cut_for_factor(0.1, &point, &boxed);
        assert_eq!(low.dimension, 0);
        assert!((low.value - 0.6).abs() < 1e-6);

        let high = cut_for_factor(0.75, &point, &boxed);
        assert_eq!(high.dimension, 1);
        assert!((high.value - 2.5).abs() < 1e-6);
    }

    #[test]
    fn zero_range_dimensions_are_skipped() {
        let boxed = BoundingBox::new(&[1.0, 0.0], &[1.0, 2.0]);
        let point = [1.0, 1.0];

        for factor in [0.0, 0.3, 0.9] {
            let cut = cut_for_factor(factor, &point, &boxed);
            assert_eq!(cut.dimension, 1);
        }
    }

    #[test]
    fn cut_at_leaf_level_always_separates() {
        // Degenerate box at a single point distinct from the query.
        let boxed = BoundingBox::from_point(&[3.0]);
        let point = [1.0];

        for factor in [0.0, 0.25, 0.5, 0.9999] {
            let cut = cut_for_factor(factor, &point, &boxed);
            assert!(separates(&cut, &point, &boxed), "factor {factor}");
        }
    }

    #[test]
    fn maximal_draw_is_nudged_below_the_maximum() {
        let boxed = BoundingBox::from_point(&[0.0]);
        let point = [1.0];

        let cut = cut_for_factor(0.999_999_999, &point, &boxed);
        assert!(cut.value < 1.0);
    }

    #[test]
    fn seeded_source_is_deterministic() {
        let boxed = BoundingBox::new(&[0.0, 0.0], &[1.0, 1.0]);
        let point = [2.0, -1.0];

        let mut a = RandomCutSource::seeded(42);
        let mut b = RandomCutSource::seeded(42);

        for _ in 0..16 {
            assert_eq!(a.draw_cut(&point, &boxed), b.draw_cut(&point, &boxed));
        }
    }
}
