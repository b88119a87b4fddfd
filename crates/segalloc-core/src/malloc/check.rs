//! Heap consistency checker.
//!
//! Walks every block from the prologue to the epilogue and then asks the
//! strategy to verify its index. Used by tests, the trace harness and the
//! fuzz target after every operation.

use serde::{Deserialize, Serialize};

use super::block::{self, BlockTag, DSIZE, MIN_BLOCK_SIZE};
use super::heap::{FIRST_BLOCK, Heap, PROLOGUE};
use super::strategy::FitStrategy;
use crate::error::HeapCheckError;

/// Block census produced by a successful check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapStats {
    pub heap_bytes: usize,
    /// Real blocks, sentinels excluded.
    pub blocks: usize,
    /// Allocated blocks, parked ones included.
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub largest_free: usize,
    pub parked_blocks: usize,
}

/// Verifies every layout invariant of `heap` and `strategy`'s index.
pub fn check_heap(heap: &Heap, strategy: &dyn FitStrategy) -> Result<HeapStats, HeapCheckError> {
    let prologue = BlockTag::new(DSIZE, true, true).encode();
    let header = heap.word(block::header_of(PROLOGUE));
    let footer = heap.word(block::footer_of(PROLOGUE, DSIZE));
    if header != prologue || footer != prologue {
        return Err(HeapCheckError::BadPrologue { header, footer });
    }

    let heap_len = heap.len();
    let mut stats = HeapStats {
        heap_bytes: heap_len,
        ..HeapStats::default()
    };
    let mut bp = FIRST_BLOCK;
    let mut prev_allocated = true;
    loop {
        if bp % DSIZE != 0 {
            return Err(HeapCheckError::Misaligned { bp });
        }
        if bp > heap_len {
            return Err(HeapCheckError::BlockOutOfBounds {
                bp,
                size: 0,
                heap_len,
            });
        }
        let word = heap.word(block::header_of(bp));
        let tag = BlockTag::decode(word);
        if tag.size == 0 {
            if bp != heap_len || !tag.allocated {
                return Err(HeapCheckError::BadEpilogue { bp, word, heap_len });
            }
            if tag.prev_allocated != prev_allocated {
                return Err(HeapCheckError::PrevAllocMismatch {
                    bp,
                    expected: prev_allocated,
                    found: tag.prev_allocated,
                });
            }
            break;
        }
        if tag.size < MIN_BLOCK_SIZE {
            return Err(HeapCheckError::BlockTooSmall { bp, size: tag.size });
        }
        if bp + tag.size > heap_len {
            return Err(HeapCheckError::BlockOutOfBounds {
                bp,
                size: tag.size,
                heap_len,
            });
        }
        if tag.prev_allocated != prev_allocated {
            return Err(HeapCheckError::PrevAllocMismatch {
                bp,
                expected: prev_allocated,
                found: tag.prev_allocated,
            });
        }
        stats.blocks += 1;
        if tag.allocated {
            stats.allocated_blocks += 1;
            stats.allocated_bytes += tag.size;
        } else {
            let footer = heap.word(block::footer_of(bp, tag.size));
            if footer != word {
                return Err(HeapCheckError::FooterMismatch {
                    bp,
                    header: word,
                    footer,
                });
            }
            if !prev_allocated {
                return Err(HeapCheckError::AdjacentFree {
                    bp: bp - BlockTag::decode(heap.word(block::prev_footer_of(bp))).size,
                    next: bp,
                });
            }
            stats.free_blocks += 1;
            stats.free_bytes += tag.size;
            stats.largest_free = stats.largest_free.max(tag.size);
        }
        prev_allocated = tag.allocated;
        bp = block::next_of(bp, tag.size);
    }

    let indexed = strategy.check(heap)?;
    if indexed != stats.free_blocks {
        return Err(HeapCheckError::IndexCountMismatch {
            indexed,
            free_blocks: stats.free_blocks,
        });
    }

    let parked = strategy.parked_blocks();
    if let Some(&bp) = parked.iter().find(|&&bp| !heap.is_allocated(bp)) {
        return Err(HeapCheckError::ParkedNotAllocated { bp });
    }
    stats.parked_blocks = parked.len();
    Ok(stats)
}
