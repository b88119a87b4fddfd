#![no_main]
use libfuzzer_sys::fuzz_target;
use segalloc_core::AllocatorConfig;
use segalloc_harness::replay::{ReplayError, ReplayOptions, replay};
use segalloc_harness::trace::Trace;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(trace) = Trace::parse(text) else {
        return;
    };
    if trace.ops.len() > 4096 {
        return;
    }
    let config = AllocatorConfig {
        max_heap_bytes: 1 << 22,
        ..AllocatorConfig::default()
    };
    match replay(&trace, config, ReplayOptions::default()) {
        Ok(_)
        | Err(ReplayError::IdInUse { .. })
        | Err(ReplayError::IdNotLive { .. })
        | Err(ReplayError::Exhausted { .. }) => {}
        Err(err) => panic!("allocator fault: {err}"),
    }
});
