//! Workload tooling for segalloc.
//!
//! This crate provides:
//! - Trace files: parse and write malloc-lab `.rep` workloads, generate synthetic ones
//! - Replay: drive an allocator through a trace with full payload verification
//! - Structured logs: JSONL export of allocator lifecycle records

#![forbid(unsafe_code)]

pub mod replay;
pub mod structured_log;
pub mod trace;

pub use replay::{ReplayError, ReplayReport, replay};
pub use trace::{Trace, TraceError, TraceOp};
