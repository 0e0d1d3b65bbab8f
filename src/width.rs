//! Filepath: src/width.rs
//!
//! Width-specialized column indices for the node arena.
//!
//! The arena stores child and cut-dimension columns with the narrowest
//! unsigned integer type that can address the configured tree, selected
//! once at construction:
//!
//! - `u8` when `capacity < 256` and `dimensions <= 256`
//! - `u16` when `capacity < 65_535` and `dimensions <= 65_535`
//! - `u32` otherwise
//!
//! The choice is purely a memory optimization; all layouts share the same
//! index semantics. [`IndexWidth`] is sealed: the three implementations
//! above are the only layouts.

mod sealed {
    pub trait Sealed {}

    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
}

/// A column cell type for the node arena.
///
/// # Invariants
///
/// - `from_index(v)` requires `v <= Self::CELL_MAX`; callers validate with
///   [`IndexWidth::try_from_index`] when the value originates outside the
///   arena (for example a point-store index).
pub trait IndexWidth: sealed::Sealed + Copy + Eq + std::fmt::Debug {
    /// Largest index value the cell can hold.
    const CELL_MAX: usize;

    /// Narrowing conversion. Debug-asserts that `value` fits.
    fn from_index(value: usize) -> Self;

    /// Checked narrowing conversion.
    fn try_from_index(value: usize) -> Option<Self>;

    /// Widening conversion back to a usable index.
    fn index(self) -> usize;
}

macro_rules! impl_index_width {
    ($ty:ty) => {
        impl IndexWidth for $ty {
            const CELL_MAX: usize = <$ty>::MAX as usize;

            #[inline]
            fn from_index(value: usize) -> Self {
                debug_assert!(value <= Self::CELL_MAX, "index {value} exceeds cell width");
                value as $ty
            }

            #[inline]
            fn try_from_index(value: usize) -> Option<Self> {
                (value <= Self::CELL_MAX).then(|| value as $ty)
            }

            #[inline]
            fn index(self) -> usize {
                self as usize
            }
        }
    };
}

impl_index_width!(u8);
impl_index_width!(u16);
impl_index_width!(u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_within_width() {
        assert_eq!(u8::from_index(255).index(), 255);
        assert_eq!(u16::from_index(65_534).index(), 65_534);
        assert_eq!(u32::from_index(1 << 20).index(), 1 << 20);
    }

    #[test]
    fn checked_conversion_rejects_overflow() {
        assert_eq!(u8::try_from_index(256), None);
        assert_eq!(u16::try_from_index(65_536), None);
        assert!(u8::try_from_index(255).is_some());
    }
}
