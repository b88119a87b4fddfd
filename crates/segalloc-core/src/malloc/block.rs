//! Block encoding.
//!
//! Every block starts with a 4-byte header word packing
//! `size | prev_alloc_bit | alloc_bit`. Free blocks repeat the header in a
//! footer at their last word; allocated blocks elide the footer because the
//! next block's prev-allocated bit already tells a backward walk whether a
//! footer exists. This is the only module that packs or unpacks header bits.
//!
//! Offsets handed around as `bp` point at the payload, one word past the
//! header, and are always 8-byte aligned.

/// Header/footer word size (bytes).
pub const WSIZE: usize = 4;

/// Alignment unit and size granularity (bytes).
pub const DSIZE: usize = 8;

/// Smallest block: header, predecessor link, successor link, footer.
pub const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

/// Exclusive upper bound on encodable block sizes.
pub const MAX_BLOCK_SIZE: usize = 1 << 30;

/// Header bit: this block is allocated.
pub const ALLOC_BIT: u32 = 0x1;

/// Header bit: the physically previous block is allocated.
pub const PREV_ALLOC_BIT: u32 = 0x2;

const SIZE_MASK: u32 = !0x7;

/// Decoded header or footer word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockTag {
    /// Total block length including header and footer.
    pub size: usize,
    /// Whether the block is allocated.
    pub allocated: bool,
    /// Whether the physically previous block is allocated.
    pub prev_allocated: bool,
}

impl BlockTag {
    /// The zero-size allocated sentinel that terminates the heap.
    pub const EPILOGUE: Self = Self::new(0, true, true);

    #[must_use]
    pub const fn new(size: usize, allocated: bool, prev_allocated: bool) -> Self {
        Self {
            size,
            allocated,
            prev_allocated,
        }
    }

    /// Packs the tag into a header word.
    #[must_use]
    pub fn encode(self) -> u32 {
        debug_assert!(self.size % DSIZE == 0, "unaligned block size {}", self.size);
        debug_assert!(self.size < MAX_BLOCK_SIZE, "block size {} too large", self.size);
        let mut word = self.size as u32 & SIZE_MASK;
        if self.allocated {
            word |= ALLOC_BIT;
        }
        if self.prev_allocated {
            word |= PREV_ALLOC_BIT;
        }
        word
    }

    /// Unpacks a header word.
    #[must_use]
    pub const fn decode(word: u32) -> Self {
        Self {
            size: (word & SIZE_MASK) as usize,
            allocated: word & ALLOC_BIT != 0,
            prev_allocated: word & PREV_ALLOC_BIT != 0,
        }
    }

    /// Returns the same tag with the prev-allocated bit replaced.
    #[must_use]
    pub const fn with_prev_allocated(self, prev_allocated: bool) -> Self {
        Self {
            prev_allocated,
            ..self
        }
    }
}

/// Header offset of the block whose payload starts at `bp`.
#[must_use]
pub const fn header_of(bp: usize) -> usize {
    bp - WSIZE
}

/// Footer offset of a block of `size` bytes at `bp`.
#[must_use]
pub const fn footer_of(bp: usize, size: usize) -> usize {
    bp + size - DSIZE
}

/// Payload offset of the physically next block.
#[must_use]
pub const fn next_of(bp: usize, size: usize) -> usize {
    bp + size
}

/// Offset of the previous block's footer word.
#[must_use]
pub const fn prev_footer_of(bp: usize) -> usize {
    bp - DSIZE
}

/// Rounds `n` up to a multiple of `align` (a power of two).
#[must_use]
pub const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Converts a caller request into a block size.
///
/// Adds the header word, rounds to the double-word boundary and clamps to
/// the minimum block. Returns `None` when the result cannot be encoded.
#[must_use]
pub fn adjusted_size(request: usize) -> Option<usize> {
    let padded = request.checked_add(WSIZE + DSIZE - 1)? & !(DSIZE - 1);
    let asize = padded.max(MIN_BLOCK_SIZE);
    (asize < MAX_BLOCK_SIZE).then_some(asize)
}

/// Bytes a caller may use inside an allocated block of `size` bytes.
#[must_use]
pub const fn payload_capacity(size: usize) -> usize {
    size.saturating_sub(WSIZE)
}
