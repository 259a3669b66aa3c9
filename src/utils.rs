//! Helper functions that don't particularly belong to any concrete module of the crate.

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// [`crate::SegAlloc`] uses it to round layout sizes up to the 8 byte
/// granularity the allocator works with, and [`crate::kernel::Kernel`] to
/// round regions up to whole pages.
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    debug_assert!(aligment.is_power_of_two());

    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_to_eight() {
        let aligments = vec![(1..8, 8), (9..16, 16), (17..24, 24), (25..32, 32)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, 8));
            }
        }
    }

    #[test]
    fn aligned_sizes_are_kept() {
        for size in (8..=4000).step_by(8) {
            assert_eq!(size, align(size, 8));
        }
    }
}
