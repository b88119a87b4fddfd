//! # segalloc-core
//!
//! A malloc-lab style heap allocator written in safe Rust.
//!
//! The heap is one growable byte arena. Blocks carry in-band boundary tags,
//! free blocks are indexed by runtime-selectable fit strategies, and an
//! adaptive exact-fit layer can defer coalescing for recurring sizes.
//! Pointers handed to callers are byte offsets into the arena; `0` is null.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod malloc;

pub use config::AllocatorConfig;
pub use error::{AllocError, ConfigError, HeapCheckError};
pub use malloc::{
    Allocator, AllocatorCounters, AllocatorLogLevel, AllocatorLogRecord, AllocatorStats,
    BackingStore, HeapStats, StrategyKind, VecStore,
};
