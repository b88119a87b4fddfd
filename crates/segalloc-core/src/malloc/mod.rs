//! Memory allocation.
//!
//! Implements the malloc family over one boundary-tagged heap arena:
//! - `block` / `heap`: header encoding and the growable region
//! - `free_list` / `size_class`: segregated address-ordered explicit lists
//! - `strategy`: first-fit, next-fit, best-fit-explicit, segregated-best-fit
//! - `exact_fit`: adaptive deferred-coalescing decorator
//! - `coalesce`: placement and boundary-tag merging
//! - `allocator`: the public front end and realloc optimizer

pub mod allocator;
pub mod block;
pub mod check;
pub mod coalesce;
pub mod exact_fit;
pub mod free_list;
pub mod heap;
pub mod size_class;
pub mod strategy;

pub use allocator::{
    Allocator, AllocatorCounters, AllocatorLogLevel, AllocatorLogRecord, AllocatorStats,
};
pub use block::BlockTag;
pub use check::HeapStats;
pub use exact_fit::{AdaptiveExactFit, ParkOutcome};
pub use heap::{BackingStore, VecStore};
pub use size_class::SizeClassTable;
pub use strategy::{FitStrategy, StrategyKind};
