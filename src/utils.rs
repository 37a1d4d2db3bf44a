//! Helpers that don't particularly belong to any concrete module of the crate.

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// Used to round payload sizes up to [`crate::block::ALIGNMENT`] and byte counts
/// up to whole [`crate::config::PAGE_SIZE`] pages.
#[inline]
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Number of `unit`-sized chunks needed to cover `bytes`.
#[inline]
pub fn div_ceil(bytes: usize, unit: usize) -> usize {
    align(bytes, unit) / unit
}
