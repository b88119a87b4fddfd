//! Allocator front end.
//!
//! `Allocator` owns the heap, the fit strategy and the lifecycle log. It is
//! the malloc-lab `mm_*` interface: `malloc`, `free`, `realloc` plus
//! `calloc`, with byte offsets standing in for pointers and `0` for null.
//! Every public operation leaves the heap self-consistent on return.

use serde::{Deserialize, Serialize};

use super::block::{self, MIN_BLOCK_SIZE};
use super::check::{self, HeapStats};
use super::coalesce::{coalesce, place};
use super::exact_fit::{AdaptiveExactFit, ParkOutcome};
use super::heap::{BackingStore, FIRST_BLOCK, Heap, VecStore};
use super::strategy::{FitStrategy, StrategyKind};
use crate::config::AllocatorConfig;
use crate::error::{AllocError, HeapCheckError};

/// Allocator lifecycle log level.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorLogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl AllocatorLogLevel {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "all" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" | "default" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocatorLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this lifecycle record.
    pub trace_id: String,
    /// Severity level.
    pub level: AllocatorLogLevel,
    /// API symbol (`malloc`, `free`, `calloc`, `realloc`, `init`, ...).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `heap_extend`, `allocator_stats`, ...).
    pub event: &'static str,
    /// Block offset involved in the event.
    pub ptr: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Size class of the block, for list strategies.
    pub class: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: live allocation count.
    pub active_count: usize,
    /// Snapshot: bytes held by live blocks, headers included.
    pub live_block_bytes: usize,
    /// Snapshot: heap length.
    pub heap_bytes: usize,
    /// Snapshot: exact-fit cache hit counter.
    pub exact_fit_hits: u64,
    /// Snapshot: heap growth counter.
    pub heap_extensions: u64,
    /// Snapshot: adaptive mode active.
    pub adaptive: bool,
}

/// Monotonic operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorCounters {
    pub malloc_calls: u64,
    pub free_calls: u64,
    pub realloc_calls: u64,
    /// Live allocations handed out and not yet released.
    pub active_count: usize,
    /// Bytes held by live blocks, headers included.
    pub live_block_bytes: usize,
    pub heap_extensions: u64,
    pub exhaustions: u64,
    pub exact_fit_hits: u64,
    pub exact_fit_parks: u64,
    pub exact_fit_spills: u64,
    pub realloc_in_place: u64,
    pub realloc_absorbed: u64,
    pub realloc_moved: u64,
}

/// Point-in-time summary for reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorStats {
    pub strategy: StrategyKind,
    pub adaptive: bool,
    pub heap_bytes: usize,
    pub parked_blocks: usize,
    pub counters: AllocatorCounters,
}

/// Heap allocator over a single growable arena.
pub struct Allocator {
    heap: Heap,
    strategy: Box<dyn FitStrategy>,
    config: AllocatorConfig,
    counters: AllocatorCounters,
    /// Monotonic lifecycle decision id.
    next_decision_id: u64,
    /// Structured allocator lifecycle records.
    lifecycle_logs: Vec<AllocatorLogRecord>,
}

impl Allocator {
    /// Creates an allocator over a fresh [`VecStore`] capped at
    /// `config.max_heap_bytes`, with one chunk of free space.
    pub fn new(config: AllocatorConfig) -> Result<Self, AllocError> {
        let store = VecStore::with_limit(config.max_heap_bytes);
        Self::with_store(config, Box::new(store))
    }

    /// Creates an allocator over a caller-supplied empty backing store.
    pub fn with_store(
        config: AllocatorConfig,
        store: Box<dyn BackingStore>,
    ) -> Result<Self, AllocError> {
        config.validate()?;
        let heap = Heap::init(store)?;
        let base = config.strategy.build();
        let strategy: Box<dyn FitStrategy> = if config.adaptive {
            Box::new(AdaptiveExactFit::new(base, &config))
        } else {
            base
        };
        let mut allocator = Self {
            heap,
            strategy,
            config,
            counters: AllocatorCounters::default(),
            next_decision_id: 1,
            lifecycle_logs: Vec::new(),
        };
        let chunk = allocator.config.chunk_size;
        allocator.grow("init", chunk)?;
        allocator.record_lifecycle(
            AllocatorLogLevel::Info,
            "init",
            "init",
            None,
            Some(chunk),
            None,
            "success",
            format!(
                "strategy={} adaptive={} limit={}",
                allocator.config.strategy,
                allocator.config.adaptive,
                allocator.heap.limit()
            ),
        );
        Ok(allocator)
    }

    fn next_log_decision_id(&mut self) -> u64 {
        let id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        id
    }

    #[allow(clippy::too_many_arguments)]
    fn record_lifecycle(
        &mut self,
        level: AllocatorLogLevel,
        symbol: &'static str,
        event: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        class: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
    ) {
        if level < self.config.log_level {
            return;
        }
        let decision_id = self.next_log_decision_id();
        let trace_id = format!("core::malloc::{}::{:016x}", symbol, decision_id);
        self.lifecycle_logs.push(AllocatorLogRecord {
            decision_id,
            trace_id,
            level,
            symbol,
            event,
            ptr,
            size,
            class,
            outcome,
            details: details.into(),
            active_count: self.counters.active_count,
            live_block_bytes: self.counters.live_block_bytes,
            heap_bytes: self.heap.len(),
            exact_fit_hits: self.counters.exact_fit_hits,
            heap_extensions: self.counters.heap_extensions,
            adaptive: self.strategy.is_adaptive(),
        });
    }

    fn record_allocator_stats(&mut self, symbol: &'static str) {
        if self.config.log_level > AllocatorLogLevel::Debug {
            return;
        }
        let parked = self.strategy.parked_blocks().len();
        self.record_lifecycle(
            AllocatorLogLevel::Debug,
            symbol,
            "allocator_stats",
            None,
            None,
            None,
            "snapshot",
            format!(
                "parked={} exhaustions={} realloc_absorbed={}",
                parked, self.counters.exhaustions, self.counters.realloc_absorbed
            ),
        );
    }

    /// Extends the heap by at least `bytes`, coalesces the new space with a
    /// free tail block and returns the merged block.
    fn grow(&mut self, symbol: &'static str, bytes: usize) -> Result<usize, AllocError> {
        let bytes = block::align_up(bytes.max(MIN_BLOCK_SIZE), block::DSIZE);
        let bp = match self.heap.extend(bytes) {
            Ok(bp) => bp,
            Err(err) => {
                self.counters.exhaustions += 1;
                self.record_lifecycle(
                    AllocatorLogLevel::Warn,
                    symbol,
                    "heap_exhausted",
                    None,
                    Some(bytes),
                    None,
                    "oom",
                    err.to_string(),
                );
                return Err(err);
            }
        };
        self.counters.heap_extensions += 1;
        let merged = coalesce(&mut self.heap, self.strategy.as_mut(), bp);
        self.record_lifecycle(
            AllocatorLogLevel::Info,
            symbol,
            "heap_extend",
            Some(merged),
            Some(bytes),
            None,
            "success",
            format!("heap_bytes={}", self.heap.len()),
        );
        Ok(merged)
    }

    fn note_allocated(&mut self, bp: usize) {
        self.counters.active_count += 1;
        self.counters.live_block_bytes += self.heap.block_size(bp);
    }

    fn note_released(&mut self, symbol: &'static str, bp: usize, size: usize) {
        match self.counters.live_block_bytes.checked_sub(size) {
            Some(next) => self.counters.live_block_bytes = next,
            None => {
                self.counters.live_block_bytes = 0;
                self.record_lifecycle(
                    AllocatorLogLevel::Error,
                    symbol,
                    "invariant_live_bytes_underflow",
                    Some(bp),
                    Some(size),
                    None,
                    "recovered",
                    "checked_sub_failed",
                );
            }
        }
        match self.counters.active_count.checked_sub(1) {
            Some(next) => self.counters.active_count = next,
            None => {
                self.counters.active_count = 0;
                self.record_lifecycle(
                    AllocatorLogLevel::Error,
                    symbol,
                    "invariant_active_count_underflow",
                    Some(bp),
                    Some(size),
                    None,
                    "recovered",
                    "checked_sub_failed",
                );
            }
        }
    }

    fn debug_assert_live(&self, ptr: usize) {
        debug_assert!(
            ptr % block::DSIZE == 0 && ptr >= FIRST_BLOCK && ptr < self.heap.len(),
            "pointer {ptr:#x} is not a block in this heap"
        );
        debug_assert!(
            self.heap.is_allocated(ptr),
            "pointer {ptr:#x} is not allocated"
        );
    }

    /// Allocates at least `size` bytes.
    ///
    /// Returns the payload offset, or `None` for a zero-size request or when
    /// the backing store is exhausted. Parked exact-fit blocks are released
    /// before giving up; otherwise a failed call leaves every block as it
    /// was.
    pub fn malloc(&mut self, size: usize) -> Option<usize> {
        self.counters.malloc_calls += 1;
        if size == 0 {
            self.record_lifecycle(
                AllocatorLogLevel::Trace,
                "malloc",
                "malloc_zero",
                None,
                Some(0),
                None,
                "noop",
                "zero_size_request",
            );
            return None;
        }
        let Some(asize) = block::adjusted_size(size) else {
            self.record_lifecycle(
                AllocatorLogLevel::Warn,
                "malloc",
                "request_too_large",
                None,
                Some(size),
                None,
                "denied",
                AllocError::RequestTooLarge { size }.to_string(),
            );
            self.record_allocator_stats("malloc");
            return None;
        };

        if self.strategy.observe_request(asize) {
            self.record_lifecycle(
                AllocatorLogLevel::Info,
                "malloc",
                "adaptive_activated",
                None,
                Some(asize),
                None,
                "activated",
                format!("strategy={}", self.strategy.kind()),
            );
        }

        if let Some(bp) = self.strategy.take_cached(asize) {
            self.counters.exact_fit_hits += 1;
            self.note_allocated(bp);
            self.record_lifecycle(
                AllocatorLogLevel::Trace,
                "malloc",
                "alloc",
                Some(bp),
                Some(size),
                None,
                "success",
                "path=exact_fit_cache",
            );
            self.record_allocator_stats("malloc");
            return Some(bp);
        }

        let (fit, path) = match self.strategy.find_fit(&self.heap, asize) {
            Some(bp) => (bp, "path=free_list"),
            None => {
                let grow_by = asize.max(self.config.chunk_size);
                match self.grow("malloc", grow_by) {
                    Ok(bp) => (bp, "path=heap_extend"),
                    Err(_) => match self.reclaim_parked(asize) {
                        Some(bp) => (bp, "path=exact_fit_reclaim"),
                        None => {
                            self.record_allocator_stats("malloc");
                            return None;
                        }
                    },
                }
            }
        };
        let threshold = self.strategy.split_threshold(asize);
        let bp = place(
            &mut self.heap,
            self.strategy.as_mut(),
            fit,
            asize,
            threshold,
            self.config.large_split_cutoff,
        );
        self.note_allocated(bp);
        let class = self.strategy.class_of(asize);
        self.record_lifecycle(
            AllocatorLogLevel::Trace,
            "malloc",
            "alloc",
            Some(bp),
            Some(size),
            class,
            "success",
            path,
        );
        self.record_allocator_stats("malloc");
        Some(bp)
    }

    /// Last resort once growth fails: hands parked blocks back to the free
    /// index and searches again.
    fn reclaim_parked(&mut self, asize: usize) -> Option<usize> {
        if self.strategy.parked_blocks().is_empty() {
            return None;
        }
        self.flush_exact_fit();
        self.strategy.find_fit(&self.heap, asize)
    }

    /// Releases a block. No-op for `0`.
    ///
    /// Passing anything other than a live pointer from this allocator is
    /// undefined; debug builds assert.
    pub fn free(&mut self, ptr: usize) {
        self.counters.free_calls += 1;
        if ptr == 0 {
            self.record_lifecycle(
                AllocatorLogLevel::Trace,
                "free",
                "free_null",
                Some(ptr),
                None,
                None,
                "noop",
                "null_pointer",
            );
            return;
        }
        self.debug_assert_live(ptr);
        let tag = self.heap.tag(ptr);
        self.note_released("free", ptr, tag.size);

        match self.strategy.park(ptr, tag.size) {
            ParkOutcome::Parked => {
                self.counters.exact_fit_parks += 1;
                self.record_lifecycle(
                    AllocatorLogLevel::Trace,
                    "free",
                    "free",
                    Some(ptr),
                    Some(tag.size),
                    None,
                    "success",
                    "path=exact_fit_park",
                );
                self.record_allocator_stats("free");
                return;
            }
            ParkOutcome::MagazineFull => {
                self.counters.exact_fit_spills += 1;
                self.record_lifecycle(
                    AllocatorLogLevel::Info,
                    "free",
                    "exact_fit_spill",
                    Some(ptr),
                    Some(tag.size),
                    None,
                    "spilled",
                    "magazine_full",
                );
            }
            ParkOutcome::NotEligible => {}
        }

        self.heap.write_free(ptr, tag.size, tag.prev_allocated);
        let merged = coalesce(&mut self.heap, self.strategy.as_mut(), ptr);
        let merged_size = self.heap.block_size(merged);
        let class = self.strategy.class_of(merged_size);
        self.record_lifecycle(
            AllocatorLogLevel::Trace,
            "free",
            "free",
            Some(ptr),
            Some(tag.size),
            class,
            "success",
            format!("path=coalesce merged={merged:#x} merged_size={merged_size}"),
        );
        self.record_allocator_stats("free");
    }

    /// Allocates `count * size` zeroed bytes. Checks for multiplication
    /// overflow.
    pub fn calloc(&mut self, count: usize, size: usize) -> Option<usize> {
        let Some(total) = count.checked_mul(size) else {
            self.record_lifecycle(
                AllocatorLogLevel::Warn,
                "calloc",
                "calloc_overflow",
                None,
                None,
                None,
                "denied",
                format!("count={} size={}", count, size),
            );
            self.record_allocator_stats("calloc");
            return None;
        };
        let out = self.malloc(total);
        if let Some(bp) = out {
            self.heap.bytes_mut(bp, total).fill(0);
        }
        self.record_lifecycle(
            AllocatorLogLevel::Trace,
            "calloc",
            "calloc_result",
            out,
            Some(total),
            None,
            if out.is_some() { "success" } else { "oom" },
            format!("count={} elem_size={}", count, size),
        );
        out
    }

    /// Resizes a block, preferring to stay in place.
    ///
    /// `ptr == 0` behaves as `malloc(new_size)`; `new_size == 0` behaves as
    /// `free(ptr)` and returns `None`. A shrink or a request that still fits
    /// returns `ptr` untouched. Growth first tries to absorb a free
    /// successor block; otherwise the payload moves to a new block. If that
    /// allocation fails, `None` is returned and `ptr` stays valid.
    pub fn realloc(&mut self, ptr: usize, new_size: usize) -> Option<usize> {
        self.counters.realloc_calls += 1;
        if ptr == 0 {
            let out = self.malloc(new_size);
            self.record_lifecycle(
                AllocatorLogLevel::Trace,
                "realloc",
                "realloc_null_as_malloc",
                out,
                Some(new_size),
                None,
                if out.is_some() { "success" } else { "oom" },
                "ptr_was_null",
            );
            return out;
        }
        if new_size == 0 {
            self.free(ptr);
            self.record_lifecycle(
                AllocatorLogLevel::Trace,
                "realloc",
                "realloc_zero_as_free",
                Some(ptr),
                Some(new_size),
                None,
                "freed",
                "new_size_was_zero",
            );
            return None;
        }
        self.debug_assert_live(ptr);
        let Some(asize) = block::adjusted_size(new_size) else {
            self.record_lifecycle(
                AllocatorLogLevel::Warn,
                "realloc",
                "request_too_large",
                Some(ptr),
                Some(new_size),
                None,
                "denied",
                AllocError::RequestTooLarge { size: new_size }.to_string(),
            );
            return None;
        };

        let tag = self.heap.tag(ptr);
        if asize <= tag.size {
            self.counters.realloc_in_place += 1;
            self.record_lifecycle(
                AllocatorLogLevel::Trace,
                "realloc",
                "realloc_in_place",
                Some(ptr),
                Some(new_size),
                None,
                "success",
                format!("block_size={}", tag.size),
            );
            return Some(ptr);
        }

        let next = block::next_of(ptr, tag.size);
        let next_tag = self.heap.tag(next);
        if !next_tag.allocated && tag.size + next_tag.size >= asize {
            self.absorb_next(ptr, tag.prev_allocated, tag.size, next, next_tag.size, asize);
            self.counters.realloc_absorbed += 1;
            self.record_lifecycle(
                AllocatorLogLevel::Trace,
                "realloc",
                "realloc_absorb_next",
                Some(ptr),
                Some(new_size),
                None,
                "success",
                format!(
                    "old_block={} absorbed={} new_block={}",
                    tag.size,
                    next_tag.size,
                    self.heap.block_size(ptr)
                ),
            );
            self.record_allocator_stats("realloc");
            return Some(ptr);
        }

        let Some(new_ptr) = self.malloc(new_size) else {
            self.record_lifecycle(
                AllocatorLogLevel::Warn,
                "realloc",
                "realloc_allocate_new_failed",
                Some(ptr),
                Some(new_size),
                None,
                "oom",
                format!("old_block={}", tag.size),
            );
            return None;
        };
        let copy = block::payload_capacity(tag.size).min(new_size);
        self.heap.copy_within(ptr, new_ptr, copy);
        self.free(ptr);
        self.counters.realloc_moved += 1;
        self.record_lifecycle(
            AllocatorLogLevel::Trace,
            "realloc",
            "realloc_move",
            Some(new_ptr),
            Some(new_size),
            None,
            "success",
            format!("old_ptr={ptr:#x} copied={copy}"),
        );
        Some(new_ptr)
    }

    /// Grows the allocated block at `ptr` over its free successor. Any
    /// excess of at least one minimum block goes back to the index.
    fn absorb_next(
        &mut self,
        ptr: usize,
        prev_allocated: bool,
        size: usize,
        next: usize,
        next_size: usize,
        asize: usize,
    ) {
        self.strategy.remove(&mut self.heap, next);
        self.strategy.on_merge(ptr, next);
        let combined = size + next_size;
        let leftover = combined - asize;
        let new_size = if leftover >= MIN_BLOCK_SIZE {
            self.heap.write_allocated(ptr, asize, prev_allocated);
            let rest = ptr + asize;
            self.heap.write_free(rest, leftover, true);
            self.strategy.insert(&mut self.heap, rest);
            asize
        } else {
            self.heap.write_allocated(ptr, combined, prev_allocated);
            self.heap.set_prev_allocated(ptr + combined, true);
            combined
        };
        self.counters.live_block_bytes += new_size - size;
    }

    /// Usable payload bytes of a live block; `0` for null.
    #[must_use]
    pub fn usable_size(&self, ptr: usize) -> usize {
        if ptr == 0 {
            return 0;
        }
        block::payload_capacity(self.heap.block_size(ptr))
    }

    /// Payload of a live block.
    #[must_use]
    pub fn payload(&self, ptr: usize) -> &[u8] {
        self.heap.bytes(ptr, self.usable_size(ptr))
    }

    /// Mutable payload of a live block.
    pub fn payload_mut(&mut self, ptr: usize) -> &mut [u8] {
        let len = self.usable_size(ptr);
        self.heap.bytes_mut(ptr, len)
    }

    /// Returns every parked block to normal free-space management.
    ///
    /// Adaptive mode stays on. Returns the number of blocks released.
    pub fn flush_exact_fit(&mut self) -> usize {
        let parked = self.strategy.drain_parked();
        for &bp in &parked {
            let tag = self.heap.tag(bp);
            self.heap.write_free(bp, tag.size, tag.prev_allocated);
            coalesce(&mut self.heap, self.strategy.as_mut(), bp);
        }
        self.record_lifecycle(
            AllocatorLogLevel::Info,
            "flush_exact_fit",
            "exact_fit_flush",
            None,
            None,
            None,
            "success",
            format!("released={}", parked.len()),
        );
        parked.len()
    }

    /// Walks the heap and the free index, verifying every layout invariant.
    pub fn check_heap(&self) -> Result<HeapStats, HeapCheckError> {
        check::check_heap(&self.heap, self.strategy.as_ref())
    }

    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            strategy: self.strategy.kind(),
            adaptive: self.strategy.is_adaptive(),
            heap_bytes: self.heap.len(),
            parked_blocks: self.strategy.parked_blocks().len(),
            counters: self.counters,
        }
    }

    #[must_use]
    pub fn counters(&self) -> &AllocatorCounters {
        &self.counters
    }

    #[must_use]
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    #[must_use]
    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Whether the adaptive exact-fit layer has activated.
    #[must_use]
    pub fn is_adaptive(&self) -> bool {
        self.strategy.is_adaptive()
    }

    /// Bytes obtained from the backing store so far.
    #[must_use]
    pub fn heap_size(&self) -> usize {
        self.heap.len()
    }

    /// Returns a view of allocator lifecycle log records.
    #[must_use]
    pub fn lifecycle_logs(&self) -> &[AllocatorLogRecord] {
        &self.lifecycle_logs
    }

    /// Drains allocator lifecycle log records.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<AllocatorLogRecord> {
        std::mem::take(&mut self.lifecycle_logs)
    }
}
