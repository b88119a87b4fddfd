//! Heap region over a grow-only backing store.
//!
//! Layout after [`Heap::init`]:
//!
//! ```text
//! 0..4    padding (offset 0 doubles as the null pointer)
//! 4..8    prologue header  (size 8, allocated)
//! 8..12   prologue footer
//! 12..16  epilogue header  (size 0, allocated)
//! ```
//!
//! Growth turns the old epilogue header into the header of a new free block
//! and writes a fresh epilogue at the new end, so the epilogue's payload
//! offset always equals the heap length.

use super::block::{self, BlockTag, DSIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, WSIZE};
use crate::error::AllocError;

/// Default backing-store capacity, matching the malloc-lab memlib.
pub const DEFAULT_MAX_HEAP: usize = 20 * (1 << 20);

/// Payload offset of the prologue block.
pub const PROLOGUE: usize = 2 * WSIZE;

/// Payload offset of the first real block.
pub const FIRST_BLOCK: usize = 4 * WSIZE;

/// Grow-only provider of the managed byte range.
///
/// Previously returned offsets stay valid across growth; the region never
/// shrinks.
pub trait BackingStore {
    /// Grows the region by `incr` bytes and returns the offset of the first
    /// new byte. Must not change anything on failure.
    fn extend(&mut self, incr: usize) -> Result<usize, AllocError>;

    fn bytes(&self) -> &[u8];

    fn bytes_mut(&mut self) -> &mut [u8];

    /// Hard capacity in bytes.
    fn limit(&self) -> usize;

    fn len(&self) -> usize {
        self.bytes().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Vector-backed store with a fixed capacity.
#[derive(Debug, Clone)]
pub struct VecStore {
    buf: Vec<u8>,
    limit: usize,
}

impl VecStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_HEAP)
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }
}

impl Default for VecStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingStore for VecStore {
    fn extend(&mut self, incr: usize) -> Result<usize, AllocError> {
        let old = self.buf.len();
        let exhausted = AllocError::Exhausted {
            requested: incr,
            heap_bytes: old,
            limit: self.limit,
        };
        match old.checked_add(incr) {
            Some(new_len) if new_len <= self.limit => {
                self.buf.resize(new_len, 0);
                Ok(old)
            }
            _ => Err(exhausted),
        }
    }

    fn bytes(&self) -> &[u8] {
        &self.buf
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    fn limit(&self) -> usize {
        self.limit
    }
}

/// The managed heap: boundary-tagged blocks between two sentinels.
pub struct Heap {
    store: Box<dyn BackingStore>,
}

impl Heap {
    /// Lays down padding, prologue and epilogue on an empty store.
    pub fn init(mut store: Box<dyn BackingStore>) -> Result<Self, AllocError> {
        if !store.is_empty() {
            return Err(AllocError::StoreNotEmpty { len: store.len() });
        }
        store.extend(4 * WSIZE)?;
        let mut heap = Self { store };
        let prologue = BlockTag::new(DSIZE, true, true).encode();
        heap.set_word(0, 0);
        heap.set_word(block::header_of(PROLOGUE), prologue);
        heap.set_word(block::footer_of(PROLOGUE, DSIZE), prologue);
        heap.set_word(block::header_of(FIRST_BLOCK), BlockTag::EPILOGUE.encode());
        Ok(heap)
    }

    /// Current heap length in bytes; also the epilogue's payload offset.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.store.limit()
    }

    #[must_use]
    pub fn epilogue(&self) -> usize {
        self.len()
    }

    /// Reads the little-endian word at `offset`.
    #[must_use]
    pub fn word(&self, offset: usize) -> u32 {
        let mut raw = [0u8; WSIZE];
        raw.copy_from_slice(&self.store.bytes()[offset..offset + WSIZE]);
        u32::from_le_bytes(raw)
    }

    pub fn set_word(&mut self, offset: usize, value: u32) {
        self.store.bytes_mut()[offset..offset + WSIZE].copy_from_slice(&value.to_le_bytes());
    }

    /// Decoded header of the block at `bp`.
    #[must_use]
    pub fn tag(&self, bp: usize) -> BlockTag {
        BlockTag::decode(self.word(block::header_of(bp)))
    }

    #[must_use]
    pub fn block_size(&self, bp: usize) -> usize {
        self.tag(bp).size
    }

    #[must_use]
    pub fn is_allocated(&self, bp: usize) -> bool {
        self.tag(bp).allocated
    }

    /// Writes header and footer for a free block.
    pub fn write_free(&mut self, bp: usize, size: usize, prev_allocated: bool) {
        debug_assert!(size >= MIN_BLOCK_SIZE, "free block {bp:#x} too small: {size}");
        let word = BlockTag::new(size, false, prev_allocated).encode();
        self.set_word(block::header_of(bp), word);
        self.set_word(block::footer_of(bp, size), word);
    }

    /// Writes the header of an allocated block. No footer.
    pub fn write_allocated(&mut self, bp: usize, size: usize, prev_allocated: bool) {
        let word = BlockTag::new(size, true, prev_allocated).encode();
        self.set_word(block::header_of(bp), word);
    }

    /// Rewrites only the prev-allocated bit of the block at `bp`.
    ///
    /// Free blocks get their footer refreshed too so the boundary tag keeps
    /// mirroring the header.
    pub fn set_prev_allocated(&mut self, bp: usize, prev_allocated: bool) {
        let tag = self.tag(bp).with_prev_allocated(prev_allocated);
        let word = tag.encode();
        self.set_word(block::header_of(bp), word);
        if !tag.allocated {
            self.set_word(block::footer_of(bp, tag.size), word);
        }
    }

    #[must_use]
    pub fn next_block(&self, bp: usize) -> usize {
        block::next_of(bp, self.block_size(bp))
    }

    /// The physically previous block, if it is free.
    ///
    /// Allocated predecessors have no footer, so they cannot be located
    /// from here and `None` is returned.
    #[must_use]
    pub fn prev_free_block(&self, bp: usize) -> Option<usize> {
        if self.tag(bp).prev_allocated {
            return None;
        }
        let size = BlockTag::decode(self.word(block::prev_footer_of(bp))).size;
        Some(bp - size)
    }

    /// Predecessor link stored in a free block's payload (0 = none).
    #[must_use]
    pub fn pred(&self, bp: usize) -> usize {
        self.word(bp) as usize
    }

    /// Successor link stored in a free block's payload (0 = none).
    #[must_use]
    pub fn succ(&self, bp: usize) -> usize {
        self.word(bp + WSIZE) as usize
    }

    pub fn set_pred(&mut self, bp: usize, pred: usize) {
        self.set_word(bp, link_word(pred));
    }

    pub fn set_succ(&mut self, bp: usize, succ: usize) {
        self.set_word(bp + WSIZE, link_word(succ));
    }

    #[must_use]
    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.store.bytes()[offset..offset + len]
    }

    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.store.bytes_mut()[offset..offset + len]
    }

    /// Copies `len` bytes between two possibly overlapping ranges.
    pub fn copy_within(&mut self, src: usize, dst: usize, len: usize) {
        self.store.bytes_mut().copy_within(src..src + len, dst);
    }

    /// Grows the heap by `bytes` and returns the new free block's `bp`.
    ///
    /// The new block is not coalesced or indexed. On failure nothing is
    /// written.
    pub fn extend(&mut self, bytes: usize) -> Result<usize, AllocError> {
        debug_assert!(bytes % DSIZE == 0 && bytes >= MIN_BLOCK_SIZE);
        let bp = self.epilogue();
        // A heap no longer than MAX_BLOCK_SIZE keeps every coalesced block
        // encodable and every link within a word.
        if bp.checked_add(bytes).is_none_or(|end| end > MAX_BLOCK_SIZE) {
            return Err(AllocError::Exhausted {
                requested: bytes,
                heap_bytes: bp,
                limit: self.limit(),
            });
        }
        let prev_allocated = self.tag(bp).prev_allocated;
        self.store.extend(bytes)?;
        self.write_free(bp, bytes, prev_allocated);
        let epilogue = BlockTag::EPILOGUE.with_prev_allocated(false).encode();
        self.set_word(block::header_of(self.epilogue()), epilogue);
        Ok(bp)
    }

    /// Walks every block from the first real one up to the epilogue.
    #[must_use]
    pub fn blocks(&self) -> Blocks<'_> {
        self.blocks_from(FIRST_BLOCK)
    }

    /// Walks blocks starting at `bp`, which must be a block start.
    #[must_use]
    pub fn blocks_from(&self, bp: usize) -> Blocks<'_> {
        Blocks { heap: self, bp }
    }
}

fn link_word(offset: usize) -> u32 {
    debug_assert!(offset <= u32::MAX as usize, "link {offset:#x} overflows a word");
    offset as u32
}

/// Iterator over `(bp, tag)` pairs in address order.
pub struct Blocks<'a> {
    heap: &'a Heap,
    bp: usize,
}

impl Iterator for Blocks<'_> {
    type Item = (usize, BlockTag);

    fn next(&mut self) -> Option<Self::Item> {
        if self.bp >= self.heap.len() {
            return None;
        }
        let tag = self.heap.tag(self.bp);
        if tag.size == 0 {
            return None;
        }
        let bp = self.bp;
        self.bp += tag.size;
        Some((bp, tag))
    }
}
