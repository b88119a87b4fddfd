//! Integration test: replay of the checked-in `.rep` traces.
//!
//! Run: cargo test -p segalloc-harness --test trace_replay_test

use std::path::{Path, PathBuf};

use segalloc_core::{AllocatorConfig, StrategyKind};
use segalloc_harness::replay::{ReplayOptions, replay};
use segalloc_harness::trace::{Pattern, Trace};

fn workspace_root() -> PathBuf {
    let manifest = env!("CARGO_MANIFEST_DIR");
    Path::new(manifest)
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .to_path_buf()
}

fn load(name: &str) -> Trace {
    let path = workspace_root().join("tests/traces").join(name);
    Trace::from_file(&path).unwrap_or_else(|err| panic!("{}: {err}", path.display()))
}

#[test]
fn checked_in_traces_replay_for_every_strategy() {
    for name in ["short1-bal.rep", "coalesce-bal.rep", "hot-sizes.rep"] {
        let trace = load(name);
        for kind in StrategyKind::ALL {
            for adaptive in [false, true] {
                let config = AllocatorConfig {
                    adaptive,
                    ..AllocatorConfig::with_strategy(kind)
                };
                let report = replay(&trace, config, ReplayOptions::default())
                    .unwrap_or_else(|err| panic!("{name} [{kind}] adaptive={adaptive}: {err}"));
                assert_eq!(report.counters.active_count, 0, "{name} [{kind}]");
                assert_eq!(report.ops, trace.ops.len());
            }
        }
    }
}

#[test]
fn coalescing_trace_stops_growing_after_first_cycle() {
    let trace = load("coalesce-bal.rep");
    for kind in StrategyKind::ALL {
        let report = replay(
            &trace,
            AllocatorConfig::with_strategy(kind),
            ReplayOptions::default(),
        )
        .unwrap();
        // Freed pairs merge and serve the 8190-byte request, so growth stops
        // after the first cycle.
        assert!(
            report.heap_bytes <= 16 + 4 * 4096,
            "[{kind}] heap grew to {}",
            report.heap_bytes
        );
        assert_eq!(report.final_stats.free_blocks, 1, "[{kind}]");
    }
}

#[test]
fn hot_size_trace_activates_exact_fit_cache() {
    let trace = load("hot-sizes.rep");
    let report = replay(&trace, AllocatorConfig::default(), ReplayOptions::default()).unwrap();
    assert!(report.adaptive_active);
    assert!(report.counters.exact_fit_hits > 0);

    let plain = replay(
        &trace,
        AllocatorConfig {
            adaptive: false,
            ..AllocatorConfig::default()
        },
        ReplayOptions::default(),
    )
    .unwrap();
    assert!(!plain.adaptive_active);
    assert_eq!(plain.counters.exact_fit_hits, 0);
    assert_eq!(report.trace_sha256, plain.trace_sha256);
}

#[test]
fn generated_trace_survives_file_round_trip() {
    let trace = Pattern::Binary.generate(1, 300);
    let path = std::env::temp_dir().join(format!("segalloc-binary-{}.rep", std::process::id()));
    std::fs::write(&path, trace.to_rep()).unwrap();
    let loaded = Trace::from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded.sha256(), trace.sha256());

    let report = replay(&loaded, AllocatorConfig::default(), ReplayOptions::timing()).unwrap();
    assert!(report.utilization > 0.0);
}
