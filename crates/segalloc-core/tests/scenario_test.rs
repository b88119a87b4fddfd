use segalloc_core::{Allocator, AllocatorConfig, StrategyKind};

fn allocator(strategy: StrategyKind) -> Allocator {
    Allocator::new(AllocatorConfig::with_strategy(strategy)).expect("allocator init")
}

#[test]
fn freed_block_serves_smaller_request_without_growth() {
    for kind in [
        StrategyKind::FirstFit,
        StrategyKind::BestFitExplicit,
        StrategyKind::SegregatedBestFit,
    ] {
        let mut alloc = allocator(kind);
        let a = alloc.malloc(32).unwrap();
        let _b = alloc.malloc(64).unwrap();
        let heap_before = alloc.heap_size();
        alloc.free(a);
        let c = alloc.malloc(16).unwrap();
        assert_eq!(c, a, "{kind}: 16-byte request should reuse the freed block");
        assert_eq!(alloc.heap_size(), heap_before, "{kind}");
        alloc.check_heap().unwrap();
    }
}

#[test]
fn watched_size_churn_stops_growing_after_activation() {
    for kind in StrategyKind::ALL {
        let mut alloc = allocator(kind);
        let mut activated_at = None;
        let mut heap_at_activation = 0;
        let mut reused = Vec::new();
        for cycle in 0..60 {
            let ptr = alloc.malloc(464).unwrap();
            alloc.payload_mut(ptr)[..464].fill(cycle as u8);
            if activated_at.is_some() {
                reused.push(ptr);
            }
            alloc.free(ptr);
            if activated_at.is_none() && alloc.is_adaptive() {
                activated_at = Some(cycle);
                heap_at_activation = alloc.heap_size();
            }
            alloc.check_heap().unwrap();
        }
        assert!(activated_at.is_some(), "{kind}: adaptive mode never activated");
        assert_eq!(alloc.heap_size(), heap_at_activation, "{kind}");
        assert!(
            reused.windows(2).all(|w| w[0] == w[1]),
            "{kind}: exact-fit cache should hand back the same block"
        );
        let stats = alloc.stats();
        assert_eq!(stats.counters.exact_fit_hits as usize, reused.len(), "{kind}");
        assert_eq!(stats.parked_blocks, 1, "{kind}");
    }
}

#[test]
fn shrinking_realloc_returns_same_pointer() {
    for kind in StrategyKind::ALL {
        let mut alloc = allocator(kind);
        let ptr = alloc.malloc(100).unwrap();
        alloc.payload_mut(ptr)[..100].copy_from_slice(&[0xC3; 100]);
        assert_eq!(alloc.realloc(ptr, 50), Some(ptr), "{kind}");
        assert_eq!(&alloc.payload(ptr)[..50], &[0xC3; 50]);
        alloc.check_heap().unwrap();
    }
}

#[test]
fn realloc_absorbs_freed_neighbour_and_leaves_next_block_alone() {
    for kind in StrategyKind::ALL {
        let mut alloc = allocator(kind);
        let x = alloc.malloc(100).unwrap();
        let a = alloc.malloc(100).unwrap();
        let b = alloc.malloc(100).unwrap();
        assert!(x < a && a < b, "{kind}: expected front-to-back placement");
        alloc.payload_mut(x)[..100].copy_from_slice(&[0x11; 100]);
        alloc.payload_mut(b)[..100].copy_from_slice(&[0x22; 100]);
        alloc.free(a);

        let grown = alloc.realloc(x, 200).unwrap();
        assert_eq!(grown, x, "{kind}: growth should absorb the freed neighbour");
        assert_eq!(&alloc.payload(x)[..100], &[0x11; 100]);
        assert_eq!(&alloc.payload(b)[..100], &[0x22; 100]);
        assert_eq!(alloc.usable_size(b), 100);
        let stats = alloc.check_heap().unwrap();
        assert_eq!(stats.allocated_blocks, 2, "{kind}");
        assert_eq!(alloc.counters().realloc_absorbed, 1, "{kind}");
    }
}

#[test]
fn zero_and_null_boundaries() {
    for kind in StrategyKind::ALL {
        let mut alloc = allocator(kind);
        let before = alloc.check_heap().unwrap();
        assert_eq!(alloc.malloc(0), None);
        alloc.free(0);
        assert_eq!(alloc.check_heap().unwrap(), before, "{kind}");

        let via_realloc = alloc.realloc(0, 48).unwrap();
        let mut twin = allocator(kind);
        let via_malloc = twin.malloc(48).unwrap();
        assert_eq!(via_realloc, via_malloc, "{kind}");
        assert_eq!(
            alloc.check_heap().unwrap(),
            twin.check_heap().unwrap(),
            "{kind}"
        );

        assert_eq!(alloc.realloc(via_realloc, 0), None);
        twin.free(via_malloc);
        assert_eq!(
            alloc.check_heap().unwrap(),
            twin.check_heap().unwrap(),
            "{kind}"
        );
    }
}

#[test]
fn payloads_are_double_word_aligned() {
    for kind in StrategyKind::ALL {
        let mut alloc = allocator(kind);
        for size in [1, 7, 8, 9, 15, 16, 17, 255, 256, 257, 1000, 5000] {
            let ptr = alloc.malloc(size).unwrap();
            assert_eq!(ptr % 8, 0, "{kind}: size {size}");
            assert!(alloc.usable_size(ptr) >= size);
        }
        alloc.check_heap().unwrap();
    }
}
