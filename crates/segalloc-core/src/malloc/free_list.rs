//! Segregated explicit free lists.
//!
//! Each size class owns a doubly linked list threaded through the payloads
//! of its free blocks (predecessor in word 0, successor in word 1, `0` for
//! none). Lists are kept in ascending address order.
//!
//! A block's class is recomputed from its current header on removal, so a
//! block must be removed before its size is rewritten.

use super::heap::{FIRST_BLOCK, Heap};
use super::size_class::SizeClassTable;
use crate::error::HeapCheckError;

/// Free-list heads and lengths for one size-class table.
#[derive(Debug, Clone)]
pub struct FreeLists {
    table: SizeClassTable,
    heads: Vec<usize>,
    lens: Vec<usize>,
}

impl FreeLists {
    #[must_use]
    pub fn new(table: SizeClassTable) -> Self {
        let classes = table.len();
        Self {
            table,
            heads: vec![0; classes],
            lens: vec![0; classes],
        }
    }

    #[must_use]
    pub fn table(&self) -> &SizeClassTable {
        &self.table
    }

    #[must_use]
    pub fn classify(&self, size: usize) -> usize {
        self.table.classify(size)
    }

    /// First block of `class`, if any.
    #[must_use]
    pub fn head(&self, class: usize) -> Option<usize> {
        self.heads.get(class).copied().filter(|&bp| bp != 0)
    }

    #[must_use]
    pub fn class_len(&self, class: usize) -> usize {
        self.lens.get(class).copied().unwrap_or(0)
    }

    /// Total number of indexed blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lens.iter().sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splices a free block into its class, keeping address order.
    pub fn insert(&mut self, heap: &mut Heap, bp: usize) {
        debug_assert!(!heap.is_allocated(bp), "inserting allocated block {bp:#x}");
        let class = self.classify(heap.block_size(bp));
        let mut prev = 0;
        let mut cur = self.heads[class];
        while cur != 0 && cur < bp {
            prev = cur;
            cur = heap.succ(cur);
        }
        debug_assert_ne!(cur, bp, "block {bp:#x} inserted twice");
        heap.set_pred(bp, prev);
        heap.set_succ(bp, cur);
        if prev == 0 {
            self.heads[class] = bp;
        } else {
            heap.set_succ(prev, bp);
        }
        if cur != 0 {
            heap.set_pred(cur, bp);
        }
        self.lens[class] += 1;
    }

    /// Unlinks a block in O(1) using its stored links.
    pub fn remove(&mut self, heap: &mut Heap, bp: usize) {
        debug_assert!(!heap.is_allocated(bp), "removing allocated block {bp:#x}");
        let class = self.classify(heap.block_size(bp));
        let pred = heap.pred(bp);
        let succ = heap.succ(bp);
        if pred == 0 {
            debug_assert_eq!(self.heads[class], bp, "block {bp:#x} is not in class {class}");
            self.heads[class] = succ;
        } else {
            heap.set_succ(pred, succ);
        }
        if succ != 0 {
            heap.set_pred(succ, pred);
        }
        self.lens[class] = self.lens[class].saturating_sub(1);
    }

    /// Members of `class` in address order.
    #[must_use]
    pub fn iter_class<'a>(&self, heap: &'a Heap, class: usize) -> ClassIter<'a> {
        ClassIter {
            heap,
            cur: self.heads.get(class).copied().unwrap_or(0),
        }
    }

    /// Smallest member of `class` that holds `asize`, stopping early on an
    /// exact match.
    #[must_use]
    pub fn best_fit(&self, heap: &Heap, class: usize, asize: usize) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for bp in self.iter_class(heap, class) {
            let size = heap.block_size(bp);
            if size == asize {
                return Some(bp);
            }
            if size > asize && best.is_none_or(|(_, best_size)| size < best_size) {
                best = Some((bp, size));
            }
        }
        best.map(|(bp, _)| bp)
    }

    /// Head of the first non-empty class at or above `class`.
    #[must_use]
    pub fn first_from(&self, class: usize) -> Option<usize> {
        (class..self.heads.len()).find_map(|c| self.head(c))
    }

    /// Verifies links, ordering, class membership and counts.
    ///
    /// Returns the number of indexed blocks.
    pub fn check(&self, heap: &Heap) -> Result<usize, HeapCheckError> {
        let max_blocks = heap.len() / super::block::MIN_BLOCK_SIZE;
        let mut total = 0;
        for class in 0..self.heads.len() {
            let mut prev = 0;
            let mut cur = self.heads[class];
            let mut seen = 0;
            while cur != 0 {
                if cur % super::block::DSIZE != 0 || cur < FIRST_BLOCK || cur >= heap.len() {
                    return Err(HeapCheckError::BrokenLink {
                        class,
                        bp: cur,
                        pred: prev,
                        expected: prev,
                    });
                }
                let tag = heap.tag(cur);
                if tag.allocated {
                    return Err(HeapCheckError::AllocatedInList { class, bp: cur });
                }
                let expected = self.classify(tag.size);
                if expected != class {
                    return Err(HeapCheckError::WrongClass {
                        bp: cur,
                        size: tag.size,
                        class,
                        expected,
                    });
                }
                let pred = heap.pred(cur);
                if pred != prev {
                    return Err(HeapCheckError::BrokenLink {
                        class,
                        bp: cur,
                        pred,
                        expected: prev,
                    });
                }
                if prev != 0 && prev >= cur {
                    return Err(HeapCheckError::ListOrder {
                        class,
                        bp: prev,
                        next: cur,
                    });
                }
                seen += 1;
                if seen > max_blocks {
                    return Err(HeapCheckError::BrokenLink {
                        class,
                        bp: cur,
                        pred,
                        expected: prev,
                    });
                }
                prev = cur;
                cur = heap.succ(cur);
            }
            if seen != self.lens[class] {
                return Err(HeapCheckError::IndexCountMismatch {
                    indexed: self.lens[class],
                    free_blocks: seen,
                });
            }
            total += seen;
        }
        Ok(total)
    }
}

/// Walks one class list via successor links.
pub struct ClassIter<'a> {
    heap: &'a Heap,
    cur: usize,
}

impl Iterator for ClassIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.cur == 0 {
            return None;
        }
        let bp = self.cur;
        self.cur = self.heap.succ(bp);
        Some(bp)
    }
}
