//! Trace replay throughput per strategy.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use segalloc_core::{AllocatorConfig, StrategyKind};
use segalloc_harness::replay::{ReplayOptions, replay};
use segalloc_harness::trace::Pattern;

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("trace_replay");

    for pattern in Pattern::ALL {
        let trace = pattern.generate(0x5EED, 3_000);
        for kind in StrategyKind::ALL {
            for adaptive in [false, true] {
                let id = format!("{:?}/{}/{}", pattern, kind.as_str(), adaptive);
                group.bench_with_input(BenchmarkId::from_parameter(id), &trace, |b, trace| {
                    b.iter(|| {
                        let config = AllocatorConfig {
                            adaptive,
                            ..AllocatorConfig::with_strategy(kind)
                        };
                        let report =
                            replay(trace, config, ReplayOptions::timing()).expect("replay");
                        criterion::black_box(report.utilization);
                    });
                });
            }
        }
    }
    group.finish();
}

criterion_group!(benches, bench_replay);
criterion_main!(benches);
