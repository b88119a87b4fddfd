//! Placement and coalescing.
//!
//! Both operations keep the strategy's index in step with the heap:
//! neighbours leave the index before their headers are rewritten, and the
//! resulting free block is inserted only once its tags are final.

use super::block::MIN_BLOCK_SIZE;
use super::heap::Heap;
use super::strategy::FitStrategy;

/// Merges the free block at `bp` with any free neighbours, indexes the
/// result and returns its `bp`.
///
/// The block's header and footer must already mark it free; it must not be
/// indexed yet.
pub fn coalesce(heap: &mut Heap, strategy: &mut dyn FitStrategy, bp: usize) -> usize {
    let tag = heap.tag(bp);
    debug_assert!(!tag.allocated, "coalescing allocated block {bp:#x}");
    let next = bp + tag.size;
    let next_tag = heap.tag(next);

    let mut start = bp;
    let mut size = tag.size;
    let mut prev_allocated = tag.prev_allocated;

    if !next_tag.allocated {
        strategy.remove(heap, next);
        strategy.on_merge(bp, next);
        size += next_tag.size;
    }
    if let Some(prev) = heap.prev_free_block(bp) {
        let prev_tag = heap.tag(prev);
        strategy.remove(heap, prev);
        strategy.on_merge(prev, bp);
        size += prev_tag.size;
        start = prev;
        prev_allocated = prev_tag.prev_allocated;
    }

    heap.write_free(start, size, prev_allocated);
    heap.set_prev_allocated(start + size, false);
    strategy.insert(heap, start);
    start
}

/// Marks `asize` bytes of the indexed free block at `bp` allocated and
/// returns the allocated block's `bp`.
///
/// A leftover smaller than `split_threshold` stays inside the allocation.
/// Otherwise the block is split: requests above `large_cutoff` take the
/// tail so the remainder keeps the lower address, smaller requests take
/// the front.
pub fn place(
    heap: &mut Heap,
    strategy: &mut dyn FitStrategy,
    bp: usize,
    asize: usize,
    split_threshold: usize,
    large_cutoff: usize,
) -> usize {
    strategy.remove(heap, bp);
    let tag = heap.tag(bp);
    debug_assert!(!tag.allocated && tag.size >= asize);
    let leftover = tag.size - asize;

    if leftover < split_threshold.max(MIN_BLOCK_SIZE) {
        heap.write_allocated(bp, tag.size, tag.prev_allocated);
        heap.set_prev_allocated(bp + tag.size, true);
        return bp;
    }

    if asize > large_cutoff {
        let alloc_bp = bp + leftover;
        heap.write_free(bp, leftover, tag.prev_allocated);
        heap.write_allocated(alloc_bp, asize, false);
        heap.set_prev_allocated(alloc_bp + asize, true);
        strategy.insert(heap, bp);
        alloc_bp
    } else {
        let rest = bp + asize;
        heap.write_allocated(bp, asize, tag.prev_allocated);
        heap.write_free(rest, leftover, true);
        strategy.insert(heap, rest);
        bp
    }
}
