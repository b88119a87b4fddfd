//! Trace replay with payload verification.
//!
//! Every live region is filled with a byte derived from its trace id. The
//! replayer checks alignment, bounds and overlap on every placement, re-reads
//! the fill before each free and resize, and runs the heap checker at the end
//! (and after every op when asked to).

use std::collections::BTreeMap;
use std::time::Instant;

use segalloc_core::{
    AllocError, Allocator, AllocatorConfig, AllocatorCounters, HeapCheckError, HeapStats,
    StrategyKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trace::{Trace, TraceOp};

/// Replay failure. `op_index` is the zero-based position in the trace.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error("op {op_index}: id {id} is already live")]
    IdInUse { op_index: usize, id: usize },
    #[error("op {op_index}: id {id} is not live")]
    IdNotLive { op_index: usize, id: usize },
    #[error("op {op_index}: allocator could not serve {size} bytes")]
    Exhausted { op_index: usize, size: usize },
    #[error("op {op_index}: id {id} got misaligned payload {ptr:#x}")]
    Misaligned { op_index: usize, id: usize, ptr: usize },
    #[error("op {op_index}: id {id} payload {ptr:#x}+{size} leaves the {heap_bytes}-byte heap")]
    OutOfBounds {
        op_index: usize,
        id: usize,
        ptr: usize,
        size: usize,
        heap_bytes: usize,
    },
    #[error("op {op_index}: id {id} has {usable} usable bytes for a {size}-byte request")]
    ShortBlock {
        op_index: usize,
        id: usize,
        size: usize,
        usable: usize,
    },
    #[error("op {op_index}: id {id} overlaps live id {other}")]
    Overlap {
        op_index: usize,
        id: usize,
        other: usize,
    },
    #[error("op {op_index}: payload of id {id} was modified at offset {offset}")]
    PayloadCorrupted {
        op_index: usize,
        id: usize,
        offset: usize,
    },
    #[error("op {op_index}: heap check failed: {source}")]
    HeapCheck {
        op_index: usize,
        #[source]
        source: HeapCheckError,
    },
}

/// Replay knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayOptions {
    /// Run the full heap checker after every op, not just at the end.
    pub check_each_op: bool,
    /// Re-read payload fills before free/resize. Disable for timing runs.
    pub verify_payloads: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            check_each_op: true,
            verify_payloads: true,
        }
    }
}

impl ReplayOptions {
    /// Only the final heap check; payload fills are still written.
    #[must_use]
    pub const fn timing() -> Self {
        Self {
            check_each_op: false,
            verify_payloads: false,
        }
    }
}

/// Outcome of a successful replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub trace_sha256: String,
    pub strategy: StrategyKind,
    pub adaptive_enabled: bool,
    pub adaptive_active: bool,
    pub ops: usize,
    pub peak_live_payload: usize,
    pub heap_bytes: usize,
    /// Peak live payload over final heap size.
    pub utilization: f64,
    pub elapsed_ns: u64,
    pub ops_per_sec: f64,
    pub counters: AllocatorCounters,
    pub final_stats: HeapStats,
}

#[derive(Debug, Clone, Copy)]
struct Region {
    ptr: usize,
    size: usize,
}

fn fill_byte(id: usize) -> u8 {
    (id as u8).wrapping_mul(0x9D) ^ 0x5A
}

/// Replays `trace` on a fresh allocator built from `config`.
pub fn replay(
    trace: &Trace,
    config: AllocatorConfig,
    options: ReplayOptions,
) -> Result<ReplayReport, ReplayError> {
    let mut alloc = Allocator::new(config)?;
    replay_with(trace, &mut alloc, options)
}

/// Replays `trace` on a caller-owned allocator, leaving its lifecycle logs
/// in place for export.
pub fn replay_with(
    trace: &Trace,
    alloc: &mut Allocator,
    options: ReplayOptions,
) -> Result<ReplayReport, ReplayError> {
    // Sized from the ids the ops name; the header count is only a claim.
    let slots = trace.ops.iter().map(|op| op.id() + 1).max().unwrap_or(0);
    let mut state = ReplayState {
        live: vec![None; slots],
        spans: BTreeMap::new(),
        live_payload: 0,
        peak_live_payload: 0,
        options,
    };

    let start = Instant::now();
    for (op_index, op) in trace.ops.iter().enumerate() {
        state.apply(alloc, op_index, *op)?;
        if options.check_each_op {
            alloc
                .check_heap()
                .map_err(|source| ReplayError::HeapCheck { op_index, source })?;
        }
    }
    let elapsed = start.elapsed();

    let end = trace.ops.len();
    for (id, region) in state.live.iter().enumerate() {
        if let Some(region) = region {
            verify_fill(alloc, end, id, *region)?;
        }
    }
    let final_stats = alloc
        .check_heap()
        .map_err(|source| ReplayError::HeapCheck {
            op_index: end,
            source,
        })?;

    let heap_bytes = alloc.heap_size();
    let secs = elapsed.as_secs_f64();
    Ok(ReplayReport {
        trace_sha256: trace.sha256(),
        strategy: alloc.strategy_kind(),
        adaptive_enabled: alloc.config().adaptive,
        adaptive_active: alloc.is_adaptive(),
        ops: trace.ops.len(),
        peak_live_payload: state.peak_live_payload,
        heap_bytes,
        utilization: state.peak_live_payload as f64 / heap_bytes as f64,
        elapsed_ns: u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
        ops_per_sec: if secs > 0.0 {
            trace.ops.len() as f64 / secs
        } else {
            0.0
        },
        counters: *alloc.counters(),
        final_stats,
    })
}

struct ReplayState {
    live: Vec<Option<Region>>,
    /// Payload start -> (payload end, id) for every non-empty live region.
    spans: BTreeMap<usize, (usize, usize)>,
    live_payload: usize,
    peak_live_payload: usize,
    options: ReplayOptions,
}

impl ReplayState {
    fn apply(
        &mut self,
        alloc: &mut Allocator,
        op_index: usize,
        op: TraceOp,
    ) -> Result<(), ReplayError> {
        match op {
            TraceOp::Alloc { id, size } => {
                if self.live[id].is_some() {
                    return Err(ReplayError::IdInUse { op_index, id });
                }
                let ptr = if size == 0 {
                    0
                } else {
                    alloc
                        .malloc(size)
                        .ok_or(ReplayError::Exhausted { op_index, size })?
                };
                self.admit(alloc, op_index, id, Region { ptr, size })?;
            }
            TraceOp::Free { id } => {
                let region = self.take(alloc, op_index, id)?;
                alloc.free(region.ptr);
            }
            TraceOp::Realloc { id, size } => {
                let old = self.take(alloc, op_index, id)?;
                match alloc.realloc(old.ptr, size) {
                    None if size == 0 => {}
                    None => return Err(ReplayError::Exhausted { op_index, size }),
                    Some(ptr) => {
                        let kept = Region {
                            ptr,
                            size: old.size.min(size),
                        };
                        verify_fill(alloc, op_index, id, kept)?;
                        self.admit(alloc, op_index, id, Region { ptr, size })?;
                    }
                }
            }
        }
        self.peak_live_payload = self.peak_live_payload.max(self.live_payload);
        Ok(())
    }

    fn take(
        &mut self,
        alloc: &Allocator,
        op_index: usize,
        id: usize,
    ) -> Result<Region, ReplayError> {
        let region = self.live[id]
            .take()
            .ok_or(ReplayError::IdNotLive { op_index, id })?;
        if self.options.verify_payloads {
            verify_fill(alloc, op_index, id, region)?;
        }
        if region.size > 0 {
            self.spans.remove(&region.ptr);
        }
        self.live_payload -= region.size;
        Ok(region)
    }

    fn admit(
        &mut self,
        alloc: &mut Allocator,
        op_index: usize,
        id: usize,
        region: Region,
    ) -> Result<(), ReplayError> {
        let Region { ptr, size } = region;
        if size > 0 {
            if ptr % 8 != 0 {
                return Err(ReplayError::Misaligned { op_index, id, ptr });
            }
            let heap_bytes = alloc.heap_size();
            if ptr + size > heap_bytes {
                return Err(ReplayError::OutOfBounds {
                    op_index,
                    id,
                    ptr,
                    size,
                    heap_bytes,
                });
            }
            let usable = alloc.usable_size(ptr);
            if usable < size {
                return Err(ReplayError::ShortBlock {
                    op_index,
                    id,
                    size,
                    usable,
                });
            }
            let end = ptr + size;
            if let Some((_, &(prev_end, other))) = self.spans.range(..end).next_back()
                && prev_end > ptr
            {
                return Err(ReplayError::Overlap {
                    op_index,
                    id,
                    other,
                });
            }
            alloc.payload_mut(ptr)[..size].fill(fill_byte(id));
            self.spans.insert(ptr, (end, id));
        }
        self.live[id] = Some(region);
        self.live_payload += size;
        Ok(())
    }
}

fn verify_fill(
    alloc: &Allocator,
    op_index: usize,
    id: usize,
    region: Region,
) -> Result<(), ReplayError> {
    if region.size == 0 {
        return Ok(());
    }
    let expected = fill_byte(id);
    match alloc.payload(region.ptr)[..region.size]
        .iter()
        .position(|&b| b != expected)
    {
        Some(offset) => Err(ReplayError::PayloadCorrupted {
            op_index,
            id,
            offset,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{Pattern, TraceOp};

    fn ops(list: &[TraceOp]) -> Trace {
        Trace::from_ops(list.to_vec())
    }

    #[test]
    fn replays_short_trace_for_every_strategy() {
        let trace = ops(&[
            TraceOp::Alloc { id: 0, size: 512 },
            TraceOp::Alloc { id: 1, size: 128 },
            TraceOp::Realloc { id: 0, size: 640 },
            TraceOp::Free { id: 1 },
            TraceOp::Free { id: 0 },
        ]);
        for kind in StrategyKind::ALL {
            let report = replay(
                &trace,
                AllocatorConfig::with_strategy(kind),
                ReplayOptions::default(),
            )
            .unwrap();
            assert_eq!(report.strategy, kind);
            assert_eq!(report.ops, 5);
            assert_eq!(report.peak_live_payload, 768);
            assert_eq!(report.counters.active_count, 0);
            assert_eq!(report.final_stats.allocated_blocks, 0);
            assert!(report.utilization > 0.0 && report.utilization <= 1.0);
            assert_eq!(report.trace_sha256, trace.sha256());
        }
    }

    #[test]
    fn rejects_inconsistent_traces() {
        let double = ops(&[
            TraceOp::Alloc { id: 0, size: 8 },
            TraceOp::Alloc { id: 0, size: 8 },
        ]);
        let err = replay(&double, AllocatorConfig::default(), ReplayOptions::default())
            .unwrap_err();
        assert!(matches!(err, ReplayError::IdInUse { op_index: 1, id: 0 }));

        let dead = ops(&[
            TraceOp::Alloc { id: 1, size: 8 },
            TraceOp::Free { id: 0 },
        ]);
        let err =
            replay(&dead, AllocatorConfig::default(), ReplayOptions::default()).unwrap_err();
        assert!(matches!(err, ReplayError::IdNotLive { op_index: 1, id: 0 }));
    }

    #[test]
    fn zero_sized_ops_follow_null_rules() {
        let trace = ops(&[
            TraceOp::Alloc { id: 0, size: 0 },
            TraceOp::Realloc { id: 0, size: 40 },
            TraceOp::Realloc { id: 0, size: 0 },
            TraceOp::Alloc { id: 0, size: 16 },
            TraceOp::Free { id: 0 },
        ]);
        let report =
            replay(&trace, AllocatorConfig::default(), ReplayOptions::default()).unwrap();
        assert_eq!(report.peak_live_payload, 40);
        assert_eq!(report.counters.active_count, 0);
    }

    #[test]
    fn exhaustion_is_reported_with_position() {
        let trace = ops(&[
            TraceOp::Alloc { id: 0, size: 1024 },
            TraceOp::Alloc { id: 1, size: 1 << 20 },
        ]);
        let config = AllocatorConfig {
            max_heap_bytes: 16 + 3 * 4096,
            ..AllocatorConfig::default()
        };
        let err = replay(&trace, config, ReplayOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::Exhausted {
                op_index: 1,
                size: 1_048_576
            }
        ));
    }

    #[test]
    fn live_slots_follow_used_ids_not_header() {
        let mut trace = ops(&[
            TraceOp::Alloc { id: 1, size: 24 },
            TraceOp::Free { id: 1 },
        ]);
        trace.num_ids = usize::MAX / 2;
        let report =
            replay(&trace, AllocatorConfig::default(), ReplayOptions::default()).unwrap();
        assert_eq!(report.ops, 2);
        assert_eq!(report.peak_live_payload, 24);
    }

    #[test]
    fn generated_patterns_replay_cleanly() {
        for pattern in Pattern::ALL {
            let trace = pattern.generate(0xABCD, 600);
            for adaptive in [false, true] {
                let config = AllocatorConfig {
                    adaptive,
                    ..AllocatorConfig::default()
                };
                let report = replay(&trace, config, ReplayOptions::default())
                    .unwrap_or_else(|err| panic!("{pattern:?} adaptive={adaptive}: {err}"));
                assert_eq!(report.final_stats.allocated_blocks, report.final_stats.parked_blocks);
            }
        }
    }

    #[test]
    fn timing_options_skip_per_op_checks() {
        let trace = Pattern::Random.generate(3, 400);
        let report = replay(&trace, AllocatorConfig::default(), ReplayOptions::timing()).unwrap();
        assert_eq!(report.ops, trace.ops.len());
        assert!(report.elapsed_ns > 0);
    }
}
