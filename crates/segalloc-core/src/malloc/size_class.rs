//! Size-class table for segregated free lists.
//!
//! Classes are defined by inclusive upper bounds on the block size. Fine
//! 16-byte steps cover small blocks, then the steps widen, and a final
//! unbounded class catches everything above the last bound.

/// Upper bounds of the bounded segregated classes (block bytes).
pub const SEGREGATED_LIMITS: [usize; 23] = [
    32, 48, 64, 80, 96, 112, 128, // 16-byte steps
    160, 192, 224, 256, // 32-byte steps
    320, 384, 448, 512, // 64-byte steps
    640, 768, 1024, 1536, 2048, // wider steps
    4096, 8192, 16384, // page multiples
];

/// Number of segregated classes including the unbounded top class.
pub const NUM_SEGREGATED_CLASSES: usize = SEGREGATED_LIMITS.len() + 1;

/// Ordered partition of block sizes into classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeClassTable {
    limits: Vec<usize>,
}

impl SizeClassTable {
    /// The standard segregated table.
    #[must_use]
    pub fn segregated() -> Self {
        Self::with_limits(SEGREGATED_LIMITS.to_vec())
    }

    /// One unbounded class: a single explicit free list.
    #[must_use]
    pub fn single() -> Self {
        Self::with_limits(Vec::new())
    }

    /// Builds a table from strictly ascending upper bounds.
    #[must_use]
    pub fn with_limits(limits: Vec<usize>) -> Self {
        debug_assert!(limits.windows(2).all(|w| w[0] < w[1]));
        Self { limits }
    }

    /// Number of classes, including the unbounded top class.
    #[must_use]
    pub fn len(&self) -> usize {
        self.limits.len() + 1
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Index of the first class whose bound is at least `size`.
    #[must_use]
    pub fn classify(&self, size: usize) -> usize {
        self.limits.partition_point(|&limit| limit < size)
    }

    /// Inclusive upper bound of `class`; `None` for the top class.
    #[must_use]
    pub fn upper_bound(&self, class: usize) -> Option<usize> {
        self.limits.get(class).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_bounds_are_inclusive() {
        let table = SizeClassTable::segregated();
        assert_eq!(table.len(), NUM_SEGREGATED_CLASSES);
        assert_eq!(table.classify(16), 0);
        assert_eq!(table.classify(32), 0);
        assert_eq!(table.classify(40), 1);
        assert_eq!(table.classify(48), 1);
        assert_eq!(table.classify(16384), 22);
        assert_eq!(table.classify(16392), 23);
        assert_eq!(table.upper_bound(23), None);
    }

    #[test]
    fn test_classify_is_monotonic() {
        let table = SizeClassTable::segregated();
        let mut last = 0;
        for size in (16..40_000).step_by(8) {
            let class = table.classify(size);
            assert!(class >= last, "class went backwards at {size}");
            if let Some(bound) = table.upper_bound(class) {
                assert!(size <= bound);
            }
            last = class;
        }
        assert_eq!(last, NUM_SEGREGATED_CLASSES - 1);
    }

    #[test]
    fn test_single_table_has_one_class() {
        let table = SizeClassTable::single();
        assert_eq!(table.len(), 1);
        assert_eq!(table.classify(16), 0);
        assert_eq!(table.classify(1 << 29), 0);
    }
}
