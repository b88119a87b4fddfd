#![no_main]
use libfuzzer_sys::fuzz_target;
use segalloc_core::{Allocator, AllocatorConfig, StrategyKind};

// Each 4-byte chunk is one op: selector, slot, then a little-endian u16 size.
fuzz_target!(|data: &[u8]| {
    let Some((&head, ops)) = data.split_first() else {
        return;
    };
    let kind = StrategyKind::ALL[usize::from(head & 3)];
    let config = AllocatorConfig {
        adaptive: head & 4 != 0,
        watched_sizes: vec![24, 72, 464],
        activation_requests: 8,
        activation_hits: 2,
        exact_fit_capacity: 4,
        max_heap_bytes: 1 << 20,
        ..AllocatorConfig::with_strategy(kind)
    };
    let Ok(mut alloc) = Allocator::new(config) else {
        return;
    };
    let mut slots: [Option<(usize, usize, u8)>; 16] = [None; 16];

    for (step, chunk) in ops.chunks_exact(4).enumerate() {
        let slot = usize::from(chunk[1] & 15);
        let size = usize::from(u16::from_le_bytes([chunk[2], chunk[3]]));
        let stamp = (step as u8) | 1;
        match chunk[0] % 4 {
            0 | 1 => {
                if let Some((ptr, _, _)) = slots[slot].take() {
                    alloc.free(ptr);
                }
                if let Some(ptr) = alloc.malloc(size) {
                    alloc.payload_mut(ptr)[..size].fill(stamp);
                    slots[slot] = Some((ptr, size, stamp));
                }
            }
            2 => {
                if let Some((ptr, _, _)) = slots[slot].take() {
                    alloc.free(ptr);
                }
            }
            _ => {
                if let Some((ptr, old, fill)) = slots[slot] {
                    match alloc.realloc(ptr, size) {
                        Some(new_ptr) => {
                            let kept = old.min(size);
                            assert!(alloc.payload(new_ptr)[..kept].iter().all(|&b| b == fill));
                            alloc.payload_mut(new_ptr)[..size].fill(fill);
                            slots[slot] = Some((new_ptr, size, fill));
                        }
                        None if size == 0 => slots[slot] = None,
                        None => {}
                    }
                }
            }
        }
        alloc.check_heap().expect("heap invariants");
        for (ptr, size, fill) in slots.iter().flatten() {
            assert!(alloc.payload(*ptr)[..*size].iter().all(|b| b == fill));
        }
    }

    for (ptr, _, _) in slots.iter().flatten() {
        alloc.free(*ptr);
    }
    alloc.flush_exact_fit();
    let stats = alloc.check_heap().expect("heap invariants");
    assert_eq!(stats.allocated_blocks, 0);
    assert_eq!(stats.free_blocks, 1);
});
