//! Error types for the allocator core.

use thiserror::Error;

/// Failures reported by heap construction and growth.
///
/// The malloc family itself keeps the null-pointer contract; these errors
/// surface through constructors, the backing store and the lifecycle log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error(
        "backing store exhausted: requested {requested} bytes with {heap_bytes} in use (limit {limit})"
    )]
    Exhausted {
        requested: usize,
        heap_bytes: usize,
        limit: usize,
    },
    #[error("request of {size} bytes exceeds the largest encodable block")]
    RequestTooLarge { size: usize },
    #[error("backing store must start empty, found {len} bytes")]
    StoreNotEmpty { len: usize },
    #[error("invalid allocator configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration parse and validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("unknown fit strategy `{0}`")]
    UnknownStrategy(String),
    #[error("unknown log level `{0}`")]
    UnknownLogLevel(String),
    #[error("environment variable {var} has unparsable value `{value}`")]
    Parse { var: &'static str, value: String },
}

/// Invariant violations found by the heap checker.
///
/// Offsets are payload offsets (`bp`) unless the field name says otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapCheckError {
    #[error("block {bp:#x} is not 8-byte aligned")]
    Misaligned { bp: usize },
    #[error("prologue is damaged (header {header:#010x}, footer {footer:#010x})")]
    BadPrologue { header: u32, footer: u32 },
    #[error("epilogue at {bp:#x} is damaged (word {word:#010x}, heap length {heap_len})")]
    BadEpilogue { bp: usize, word: u32, heap_len: usize },
    #[error("block {bp:#x} of size {size} runs past the heap end {heap_len}")]
    BlockOutOfBounds {
        bp: usize,
        size: usize,
        heap_len: usize,
    },
    #[error("block {bp:#x} has size {size}, below the minimum block")]
    BlockTooSmall { bp: usize, size: usize },
    #[error("free block {bp:#x} footer {footer:#010x} does not mirror header {header:#010x}")]
    FooterMismatch { bp: usize, header: u32, footer: u32 },
    #[error("block {bp:#x} prev-allocated bit is {found}, previous block allocated is {expected}")]
    PrevAllocMismatch {
        bp: usize,
        expected: bool,
        found: bool,
    },
    #[error("free blocks {bp:#x} and {next:#x} are adjacent and were not coalesced")]
    AdjacentFree { bp: usize, next: usize },
    #[error("class {class} list is not address ordered at {bp:#x} -> {next:#x}")]
    ListOrder { class: usize, bp: usize, next: usize },
    #[error("block {bp:#x} of size {size} sits in class {class}, expected {expected}")]
    WrongClass {
        bp: usize,
        size: usize,
        class: usize,
        expected: usize,
    },
    #[error("class {class} link at {bp:#x} is broken (pred {pred:#x}, expected {expected:#x})")]
    BrokenLink {
        class: usize,
        bp: usize,
        pred: usize,
        expected: usize,
    },
    #[error("allocated block {bp:#x} is linked into class {class}")]
    AllocatedInList { class: usize, bp: usize },
    #[error("free index holds {indexed} blocks but the heap has {free_blocks} free blocks")]
    IndexCountMismatch { indexed: usize, free_blocks: usize },
    #[error("next-fit rover {rover:#x} does not point at a block")]
    RoverDetached { rover: usize },
    #[error("parked block {bp:#x} is not marked allocated")]
    ParkedNotAllocated { bp: usize },
}
