use std::cell::Cell;
use std::rc::Rc;

use segalloc_core::{
    AllocError, Allocator, AllocatorConfig, AllocatorLogLevel, BackingStore, ConfigError,
    StrategyKind, VecStore,
};

/// Delegating store that counts growth calls.
struct CountingStore {
    inner: VecStore,
    extends: Rc<Cell<usize>>,
}

impl BackingStore for CountingStore {
    fn extend(&mut self, incr: usize) -> Result<usize, AllocError> {
        self.extends.set(self.extends.get() + 1);
        self.inner.extend(incr)
    }

    fn bytes(&self) -> &[u8] {
        self.inner.bytes()
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self.inner.bytes_mut()
    }

    fn limit(&self) -> usize {
        self.inner.limit()
    }
}

fn small_heap(strategy: StrategyKind) -> Allocator {
    Allocator::new(AllocatorConfig {
        max_heap_bytes: 16 + 2 * 4096,
        ..AllocatorConfig::with_strategy(strategy)
    })
    .expect("allocator init")
}

#[test]
fn failed_malloc_leaves_heap_untouched() {
    for kind in StrategyKind::ALL {
        let mut alloc = small_heap(kind);
        let a = alloc.malloc(3000).unwrap();
        let b = alloc.malloc(3000).unwrap();
        alloc.payload_mut(a)[..3000].fill(0xA1);
        alloc.payload_mut(b)[..3000].fill(0xB2);
        let before = alloc.check_heap().unwrap();
        let heap_before = alloc.heap_size();

        assert_eq!(alloc.malloc(6000), None, "{kind}");
        assert_eq!(alloc.check_heap().unwrap(), before, "{kind}");
        assert_eq!(alloc.heap_size(), heap_before, "{kind}");
        assert!(alloc.payload(a)[..3000].iter().all(|&x| x == 0xA1));
        assert!(alloc.payload(b)[..3000].iter().all(|&x| x == 0xB2));

        // A smaller retry still succeeds from what is left.
        let c = alloc.malloc(512).unwrap();
        assert_ne!(c, a);
        assert_ne!(c, b);
        alloc.check_heap().unwrap();
    }
}

#[test]
fn failed_realloc_keeps_original_block() {
    for kind in StrategyKind::ALL {
        let mut alloc = small_heap(kind);
        let a = alloc.malloc(3000).unwrap();
        let _b = alloc.malloc(3000).unwrap();
        alloc.payload_mut(a)[..3000].fill(0x3C);
        let before = alloc.check_heap().unwrap();

        assert_eq!(alloc.realloc(a, 7000), None, "{kind}");
        assert_eq!(alloc.check_heap().unwrap(), before, "{kind}");
        assert_eq!(alloc.usable_size(a), 3004);
        assert!(alloc.payload(a)[..3000].iter().all(|&x| x == 0x3C));
        assert_eq!(alloc.counters().active_count, 2, "{kind}");

        let logs = alloc.drain_lifecycle_logs();
        assert!(logs.iter().any(|entry| {
            entry.level == AllocatorLogLevel::Warn && entry.event == "heap_exhausted"
        }));
        assert!(logs.iter().any(|entry| {
            entry.level == AllocatorLogLevel::Warn && entry.event == "realloc_allocate_new_failed"
        }));
        assert!(alloc.counters().exhaustions >= 1);

        // The block is still usable and releasable.
        alloc.free(a);
        alloc.check_heap().unwrap();
    }
}

#[test]
fn constructor_rejects_bad_config_and_dirty_store() {
    let err = Allocator::new(AllocatorConfig {
        max_heap_bytes: 1024,
        ..AllocatorConfig::default()
    })
    .err()
    .unwrap();
    assert!(matches!(
        err,
        AllocError::Config(ConfigError::InvalidValue { field: "max_heap_bytes", .. })
    ));

    let err = Allocator::new(AllocatorConfig {
        max_heap_bytes: 1536 << 20,
        adaptive: false,
        ..AllocatorConfig::default()
    })
    .err()
    .unwrap();
    assert!(matches!(
        err,
        AllocError::Config(ConfigError::InvalidValue { field: "max_heap_bytes", .. })
    ));

    let mut dirty = VecStore::new();
    dirty.extend(64).unwrap();
    let err = Allocator::with_store(AllocatorConfig::default(), Box::new(dirty))
        .err()
        .unwrap();
    assert_eq!(err, AllocError::StoreNotEmpty { len: 64 });
}

#[test]
fn custom_store_sees_chunked_growth() {
    let extends = Rc::new(Cell::new(0));
    let store = CountingStore {
        inner: VecStore::with_limit(1 << 20),
        extends: Rc::clone(&extends),
    };
    let mut alloc = Allocator::with_store(AllocatorConfig::default(), Box::new(store)).unwrap();
    // Sentinels plus the first chunk.
    assert_eq!(extends.get(), 2);

    let ptrs: Vec<usize> = (0..64).map(|_| alloc.malloc(200).unwrap()).collect();
    let grown = extends.get() - 2;
    assert!(grown >= 2, "64 x 208 bytes needs more than one extra chunk");
    assert_eq!(alloc.counters().heap_extensions as usize, grown + 1);
    for ptr in ptrs {
        alloc.free(ptr);
    }
    assert_eq!(alloc.check_heap().unwrap().free_blocks, 1);
    assert_eq!(extends.get() - 2, grown, "freeing never grows the heap");
}
