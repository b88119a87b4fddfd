//! Adaptive exact-fit policy.
//!
//! A small set of watched request sizes is declared up front. The policy
//! counts requests; once enough of them have arrived and one watched size
//! recurs often enough, the allocator flips (permanently) into adaptive
//! mode. From then on, blocks released at a watched size are parked on a
//! per-size LIFO magazine instead of being coalesced, and watched requests
//! pop those magazines before any list search.
//!
//! Parked blocks keep their allocated bit, so neighbouring blocks never see
//! them as free. The deferred-coalescing exception is therefore confined to
//! the magazines and bounded by their capacity.

use super::block::{self, MIN_BLOCK_SIZE};
use super::heap::Heap;
use super::strategy::{FitStrategy, StrategyKind};
use crate::config::AllocatorConfig;
use crate::error::HeapCheckError;

/// Result of offering a released block to the exact-fit cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkOutcome {
    /// Adaptive mode is off or the size is not watched.
    NotEligible,
    /// The block now sits on a magazine.
    Parked,
    /// The size is watched but its magazine is full.
    MagazineFull,
}

#[derive(Debug, Clone)]
struct WatchedSize {
    /// Adjusted block size a matching request maps to.
    block: usize,
    hits: u64,
}

/// Request counters and the one-way activation switch.
#[derive(Debug, Clone)]
pub struct AdaptivePolicy {
    watched: Vec<WatchedSize>,
    total_requests: u64,
    activation_requests: u64,
    activation_hits: u64,
    active: bool,
}

impl AdaptivePolicy {
    /// Builds a policy over caller-facing request sizes. Sizes that do not
    /// map to an encodable block are ignored; duplicates collapse.
    #[must_use]
    pub fn new(watched_requests: &[usize], activation_requests: u64, activation_hits: u64) -> Self {
        let mut blocks: Vec<usize> = watched_requests
            .iter()
            .filter(|&&request| request > 0)
            .filter_map(|&request| block::adjusted_size(request))
            .collect();
        blocks.sort_unstable();
        blocks.dedup();
        Self {
            watched: blocks
                .into_iter()
                .map(|block| WatchedSize { block, hits: 0 })
                .collect(),
            total_requests: 0,
            activation_requests,
            activation_hits,
            active: false,
        }
    }

    /// Counts one request of adjusted size `asize`. Returns `true` exactly
    /// once, on the request that activates adaptive mode.
    pub fn observe(&mut self, asize: usize) -> bool {
        self.total_requests = self.total_requests.saturating_add(1);
        if let Some(index) = self.watched_index(asize) {
            let slot = &mut self.watched[index];
            slot.hits = slot.hits.saturating_add(1);
        }
        if self.active || self.total_requests < self.activation_requests {
            return false;
        }
        if self.watched.iter().any(|w| w.hits >= self.activation_hits) {
            self.active = true;
            return true;
        }
        false
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    /// Hit counter for the watched block size `block`, if watched.
    #[must_use]
    pub fn hits(&self, block: usize) -> Option<u64> {
        self.watched_index(block).map(|i| self.watched[i].hits)
    }

    /// Adjusted block sizes being watched, ascending.
    #[must_use]
    pub fn watched_blocks(&self) -> Vec<usize> {
        self.watched.iter().map(|w| w.block).collect()
    }

    /// Slot of the watched size equal to `asize`.
    #[must_use]
    pub fn watched_index(&self, asize: usize) -> Option<usize> {
        self.watched.iter().position(|w| w.block == asize)
    }

    /// Slot a released block of `size` bytes belongs to: the first watched
    /// size `w` with `w <= size < w + slack`.
    #[must_use]
    pub fn slot_for_block(&self, size: usize, slack: usize) -> Option<usize> {
        self.watched
            .iter()
            .position(|w| w.block <= size && size < w.block + slack)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.watched.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.watched.is_empty()
    }
}

/// One LIFO stack of parked block offsets.
#[derive(Debug, Clone)]
struct Magazine {
    blocks: Vec<usize>,
    capacity: usize,
}

impl Magazine {
    fn new(capacity: usize) -> Self {
        Self {
            blocks: Vec::new(),
            capacity,
        }
    }

    fn pop(&mut self) -> Option<usize> {
        self.blocks.pop()
    }

    /// Returns `false` if the magazine is full.
    fn push(&mut self, bp: usize) -> bool {
        if self.blocks.len() < self.capacity {
            self.blocks.push(bp);
            true
        } else {
            false
        }
    }

    fn drain(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.blocks)
    }
}

/// One magazine per watched size.
#[derive(Debug, Clone)]
pub struct ExactFitCache {
    magazines: Vec<Magazine>,
    total_cached: usize,
}

impl ExactFitCache {
    #[must_use]
    pub fn new(slots: usize, capacity: usize) -> Self {
        Self {
            magazines: (0..slots).map(|_| Magazine::new(capacity)).collect(),
            total_cached: 0,
        }
    }

    pub fn pop(&mut self, slot: usize) -> Option<usize> {
        let bp = self.magazines.get_mut(slot)?.pop()?;
        self.total_cached -= 1;
        Some(bp)
    }

    /// Returns `true` if the block was parked.
    pub fn push(&mut self, slot: usize, bp: usize) -> bool {
        let Some(magazine) = self.magazines.get_mut(slot) else {
            return false;
        };
        let parked = magazine.push(bp);
        if parked {
            self.total_cached += 1;
        }
        parked
    }

    #[must_use]
    pub fn total_cached(&self) -> usize {
        self.total_cached
    }

    #[must_use]
    pub fn blocks(&self) -> Vec<usize> {
        self.magazines
            .iter()
            .flat_map(|m| m.blocks.iter().copied())
            .collect()
    }

    pub fn drain_all(&mut self) -> Vec<usize> {
        self.total_cached = 0;
        self.magazines.iter_mut().flat_map(Magazine::drain).collect()
    }
}

/// Exact-fit decorator over any base strategy.
pub struct AdaptiveExactFit {
    inner: Box<dyn FitStrategy>,
    policy: AdaptivePolicy,
    /// Created on activation.
    cache: Option<ExactFitCache>,
    capacity: usize,
    hot_split_threshold: usize,
}

impl AdaptiveExactFit {
    #[must_use]
    pub fn new(inner: Box<dyn FitStrategy>, config: &AllocatorConfig) -> Self {
        Self {
            inner,
            policy: AdaptivePolicy::new(
                &config.watched_sizes,
                config.activation_requests,
                config.activation_hits,
            ),
            cache: None,
            capacity: config.exact_fit_capacity,
            hot_split_threshold: config.hot_split_threshold.max(MIN_BLOCK_SIZE),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &AdaptivePolicy {
        &self.policy
    }
}

impl FitStrategy for AdaptiveExactFit {
    fn kind(&self) -> StrategyKind {
        self.inner.kind()
    }

    fn insert(&mut self, heap: &mut Heap, bp: usize) {
        self.inner.insert(heap, bp);
    }

    fn remove(&mut self, heap: &mut Heap, bp: usize) {
        self.inner.remove(heap, bp);
    }

    fn find_fit(&mut self, heap: &Heap, asize: usize) -> Option<usize> {
        self.inner.find_fit(heap, asize)
    }

    fn on_merge(&mut self, survivor: usize, absorbed: usize) {
        self.inner.on_merge(survivor, absorbed);
    }

    fn check(&self, heap: &Heap) -> Result<usize, HeapCheckError> {
        self.inner.check(heap)
    }

    fn class_of(&self, size: usize) -> Option<usize> {
        self.inner.class_of(size)
    }

    fn observe_request(&mut self, asize: usize) -> bool {
        let activated = self.policy.observe(asize);
        if activated {
            self.cache = Some(ExactFitCache::new(self.policy.len(), self.capacity));
        }
        activated
    }

    fn take_cached(&mut self, asize: usize) -> Option<usize> {
        let slot = self.policy.watched_index(asize)?;
        self.cache.as_mut()?.pop(slot)
    }

    fn park(&mut self, bp: usize, size: usize) -> ParkOutcome {
        let Some(cache) = self.cache.as_mut() else {
            return ParkOutcome::NotEligible;
        };
        let Some(slot) = self.policy.slot_for_block(size, self.hot_split_threshold) else {
            return ParkOutcome::NotEligible;
        };
        if cache.push(slot, bp) {
            ParkOutcome::Parked
        } else {
            ParkOutcome::MagazineFull
        }
    }

    fn split_threshold(&self, asize: usize) -> usize {
        if self.policy.is_active() && self.policy.watched_index(asize).is_some() {
            self.hot_split_threshold
        } else {
            MIN_BLOCK_SIZE
        }
    }

    fn is_adaptive(&self) -> bool {
        self.policy.is_active()
    }

    fn parked_blocks(&self) -> Vec<usize> {
        self.cache.as_ref().map_or_else(Vec::new, ExactFitCache::blocks)
    }

    fn drain_parked(&mut self) -> Vec<usize> {
        self.cache
            .as_mut()
            .map_or_else(Vec::new, ExactFitCache::drain_all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AllocatorConfig {
        AllocatorConfig {
            watched_sizes: vec![80, 128, 464],
            activation_requests: 10,
            activation_hits: 5,
            exact_fit_capacity: 2,
            hot_split_threshold: 32,
            ..AllocatorConfig::default()
        }
    }

    #[test]
    fn test_policy_maps_requests_to_block_sizes() {
        let policy = AdaptivePolicy::new(&[80, 128, 464, 80, 0], 10, 5);
        assert_eq!(policy.watched_blocks(), vec![88, 136, 472]);
        assert_eq!(policy.watched_index(136), Some(1));
        assert_eq!(policy.watched_index(128), None);
    }

    #[test]
    fn test_policy_needs_both_thresholds() {
        let mut policy = AdaptivePolicy::new(&[80], 10, 5);
        for _ in 0..4 {
            assert!(!policy.observe(88));
        }
        for _ in 0..5 {
            assert!(!policy.observe(24));
        }
        assert_eq!(policy.total_requests(), 9);
        // Tenth request crosses the total threshold but only 4 hits so far.
        assert!(!policy.observe(24));
        assert!(policy.observe(88));
        assert!(policy.is_active());
        assert_eq!(policy.hits(88), Some(5));
        // One-way: never reports activation again.
        assert!(!policy.observe(88));
    }

    #[test]
    fn test_slot_for_block_uses_slack_window() {
        let policy = AdaptivePolicy::new(&[80, 128], 10, 5);
        assert_eq!(policy.slot_for_block(88, 32), Some(0));
        assert_eq!(policy.slot_for_block(112, 32), Some(0));
        assert_eq!(policy.slot_for_block(120, 32), None);
        assert_eq!(policy.slot_for_block(136, 32), Some(1));
        assert_eq!(policy.slot_for_block(80, 32), None);
    }

    #[test]
    fn test_cache_is_lifo_and_bounded() {
        let mut cache = ExactFitCache::new(1, 2);
        assert!(cache.push(0, 16));
        assert!(cache.push(0, 64));
        assert!(!cache.push(0, 128));
        assert_eq!(cache.total_cached(), 2);
        assert_eq!(cache.pop(0), Some(64));
        assert_eq!(cache.drain_all(), vec![16]);
        assert_eq!(cache.total_cached(), 0);
        assert_eq!(cache.pop(0), None);
        assert!(!cache.push(3, 16));
    }

    #[test]
    fn test_decorator_parks_only_after_activation() {
        let mut strategy = AdaptiveExactFit::new(StrategyKind::SegregatedBestFit.build(), &config());
        assert_eq!(strategy.park(16, 88), ParkOutcome::NotEligible);
        assert_eq!(strategy.split_threshold(88), MIN_BLOCK_SIZE);
        let activated = (0..10).any(|_| strategy.observe_request(88));
        assert!(activated);
        assert!(strategy.is_adaptive());
        assert_eq!(strategy.split_threshold(88), 32);
        assert_eq!(strategy.split_threshold(96), MIN_BLOCK_SIZE);
        assert_eq!(strategy.park(16, 88), ParkOutcome::Parked);
        assert_eq!(strategy.park(200, 96), ParkOutcome::Parked);
        assert_eq!(strategy.park(400, 88), ParkOutcome::MagazineFull);
        assert_eq!(strategy.park(600, 24), ParkOutcome::NotEligible);
        assert_eq!(strategy.take_cached(88), Some(200));
        assert_eq!(strategy.take_cached(96), None);
        assert_eq!(strategy.parked_blocks(), vec![16]);
        assert_eq!(strategy.drain_parked(), vec![16]);
        assert!(strategy.parked_blocks().is_empty());
    }
}
