//! Runtime-pluggable fit strategies.
//!
//! A strategy owns whatever index it keeps over free blocks and answers
//! `find_fit`. Implicit strategies (first-fit, next-fit) keep no index and
//! walk the heap; list strategies keep [`FreeLists`]. The adaptive exact-fit
//! layer in [`super::exact_fit`] wraps any of them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::block::{BlockTag, MIN_BLOCK_SIZE};
use super::exact_fit::ParkOutcome;
use super::free_list::FreeLists;
use super::heap::{FIRST_BLOCK, Heap};
use super::size_class::SizeClassTable;
use crate::error::HeapCheckError;

/// Selectable base strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Walk the whole heap, take the first free block that fits.
    FirstFit,
    /// Like first-fit, resuming from where the previous search stopped.
    NextFit,
    /// One address-ordered explicit list, best fit.
    BestFitExplicit,
    /// Segregated lists, best fit within the home class.
    #[default]
    SegregatedBestFit,
}

impl StrategyKind {
    pub const ALL: [Self; 4] = [
        Self::FirstFit,
        Self::NextFit,
        Self::BestFitExplicit,
        Self::SegregatedBestFit,
    ];

    /// Parse from string (case-insensitive, `-` and `_` interchangeable).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "first_fit" | "first" | "implicit" => Some(Self::FirstFit),
            "next_fit" | "next" => Some(Self::NextFit),
            "best_fit_explicit" | "explicit" | "best_fit" | "explicit_best" => {
                Some(Self::BestFitExplicit)
            }
            "segregated_best_fit" | "segregated" | "seg" | "default" => {
                Some(Self::SegregatedBestFit)
            }
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FirstFit => "first_fit",
            Self::NextFit => "next_fit",
            Self::BestFitExplicit => "best_fit_explicit",
            Self::SegregatedBestFit => "segregated_best_fit",
        }
    }

    /// Instantiates the base strategy.
    #[must_use]
    pub fn build(self) -> Box<dyn FitStrategy> {
        match self {
            Self::FirstFit => Box::new(FirstFit),
            Self::NextFit => Box::new(NextFit::default()),
            Self::BestFitExplicit => Box::new(ListFit::explicit()),
            Self::SegregatedBestFit => Box::new(ListFit::segregated()),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-block index and search policy.
///
/// `insert` and `remove` are only ever called with free blocks whose header
/// is current; `remove` always precedes any rewrite of the block's size.
/// The adaptive hooks have inert defaults and are overridden by the
/// exact-fit decorator.
pub trait FitStrategy {
    fn kind(&self) -> StrategyKind;

    fn insert(&mut self, heap: &mut Heap, bp: usize);

    fn remove(&mut self, heap: &mut Heap, bp: usize);

    /// A free block of at least `asize` bytes, if one is indexed.
    fn find_fit(&mut self, heap: &Heap, asize: usize) -> Option<usize>;

    /// `absorbed` stopped being a block start; it now lies inside `survivor`.
    fn on_merge(&mut self, _survivor: usize, _absorbed: usize) {}

    /// Verifies the index and returns how many free blocks it covers.
    fn check(&self, heap: &Heap) -> Result<usize, HeapCheckError>;

    /// Class a block of `size` bytes would be filed under, for list strategies.
    fn class_of(&self, _size: usize) -> Option<usize> {
        None
    }

    /// Counts a request. Returns `true` when this request switched the
    /// strategy into adaptive mode.
    fn observe_request(&mut self, _asize: usize) -> bool {
        false
    }

    /// Pops a parked block for an exact watched request.
    fn take_cached(&mut self, _asize: usize) -> Option<usize> {
        None
    }

    /// Offers a block being released for parking instead of coalescing.
    fn park(&mut self, _bp: usize, _size: usize) -> ParkOutcome {
        ParkOutcome::NotEligible
    }

    /// Leftover below which `place` issues the whole block.
    fn split_threshold(&self, _asize: usize) -> usize {
        MIN_BLOCK_SIZE
    }

    fn is_adaptive(&self) -> bool {
        false
    }

    fn parked_blocks(&self) -> Vec<usize> {
        Vec::new()
    }

    /// Empties every parked stack, handing the blocks back to the caller.
    fn drain_parked(&mut self) -> Vec<usize> {
        Vec::new()
    }
}

fn count_free_blocks(heap: &Heap) -> usize {
    heap.blocks().filter(|(_, tag)| !tag.allocated).count()
}

/// Implicit first-fit: no index, linear walk from the first block.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstFit;

impl FitStrategy for FirstFit {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FirstFit
    }

    fn insert(&mut self, _heap: &mut Heap, _bp: usize) {}

    fn remove(&mut self, _heap: &mut Heap, _bp: usize) {}

    fn find_fit(&mut self, heap: &Heap, asize: usize) -> Option<usize> {
        heap.blocks()
            .find(|(_, tag)| !tag.allocated && tag.size >= asize)
            .map(|(bp, _)| bp)
    }

    fn check(&self, heap: &Heap) -> Result<usize, HeapCheckError> {
        Ok(count_free_blocks(heap))
    }
}

/// Implicit next-fit with a roving start pointer.
///
/// `rover == 0` means "start from the first block".
#[derive(Debug, Clone, Copy, Default)]
pub struct NextFit {
    rover: usize,
}

impl NextFit {
    #[must_use]
    pub fn rover(&self) -> usize {
        self.rover
    }
}

impl FitStrategy for NextFit {
    fn kind(&self) -> StrategyKind {
        StrategyKind::NextFit
    }

    fn insert(&mut self, _heap: &mut Heap, _bp: usize) {}

    fn remove(&mut self, _heap: &mut Heap, _bp: usize) {}

    fn find_fit(&mut self, heap: &Heap, asize: usize) -> Option<usize> {
        let start = if self.rover >= FIRST_BLOCK && self.rover < heap.len() {
            self.rover
        } else {
            FIRST_BLOCK
        };
        let fits = |&(_, tag): &(usize, BlockTag)| !tag.allocated && tag.size >= asize;
        let hit = heap.blocks_from(start).find(fits).or_else(|| {
            heap.blocks()
                .take_while(|&(bp, _)| bp < start)
                .find(fits)
        });
        let (bp, _) = hit?;
        self.rover = bp;
        Some(bp)
    }

    fn on_merge(&mut self, survivor: usize, absorbed: usize) {
        if self.rover == absorbed {
            self.rover = survivor;
        }
    }

    fn check(&self, heap: &Heap) -> Result<usize, HeapCheckError> {
        if self.rover != 0 && !heap.blocks().any(|(bp, _)| bp == self.rover) {
            return Err(HeapCheckError::RoverDetached { rover: self.rover });
        }
        Ok(count_free_blocks(heap))
    }
}

/// Explicit-list strategies: one list (best-fit-explicit) or the segregated
/// table (segregated-best-fit).
#[derive(Debug, Clone)]
pub struct ListFit {
    kind: StrategyKind,
    lists: FreeLists,
}

impl ListFit {
    #[must_use]
    pub fn explicit() -> Self {
        Self {
            kind: StrategyKind::BestFitExplicit,
            lists: FreeLists::new(SizeClassTable::single()),
        }
    }

    #[must_use]
    pub fn segregated() -> Self {
        Self {
            kind: StrategyKind::SegregatedBestFit,
            lists: FreeLists::new(SizeClassTable::segregated()),
        }
    }

    #[must_use]
    pub fn lists(&self) -> &FreeLists {
        &self.lists
    }
}

impl FitStrategy for ListFit {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    fn insert(&mut self, heap: &mut Heap, bp: usize) {
        self.lists.insert(heap, bp);
    }

    fn remove(&mut self, heap: &mut Heap, bp: usize) {
        self.lists.remove(heap, bp);
    }

    /// Best fit inside the home class, else the head of the next
    /// non-empty class. Every member of a higher class already exceeds the
    /// home bound and therefore the request.
    fn find_fit(&mut self, heap: &Heap, asize: usize) -> Option<usize> {
        let home = self.lists.classify(asize);
        self.lists
            .best_fit(heap, home, asize)
            .or_else(|| self.lists.first_from(home + 1))
    }

    fn check(&self, heap: &Heap) -> Result<usize, HeapCheckError> {
        self.lists.check(heap)
    }

    fn class_of(&self, size: usize) -> Option<usize> {
        Some(self.lists.classify(size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::malloc::heap::VecStore;

    fn heap_with_free_block(size: usize) -> (Heap, usize) {
        let mut heap = Heap::init(Box::new(VecStore::with_limit(1 << 20))).unwrap();
        let bp = heap.extend(size).unwrap();
        (heap, bp)
    }

    #[test]
    fn test_from_str_loose_accepts_aliases() {
        assert_eq!(StrategyKind::from_str_loose("First-Fit"), Some(StrategyKind::FirstFit));
        assert_eq!(StrategyKind::from_str_loose("next"), Some(StrategyKind::NextFit));
        assert_eq!(
            StrategyKind::from_str_loose("EXPLICIT"),
            Some(StrategyKind::BestFitExplicit)
        );
        assert_eq!(
            StrategyKind::from_str_loose(" segregated "),
            Some(StrategyKind::SegregatedBestFit)
        );
        assert_eq!(StrategyKind::from_str_loose("buddy"), None);
        for kind in StrategyKind::ALL {
            assert_eq!(StrategyKind::from_str_loose(kind.as_str()), Some(kind));
            assert_eq!(kind.build().kind(), kind);
        }
    }

    #[test]
    fn test_serde_names_match_as_str() {
        for kind in StrategyKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_first_fit_takes_lowest_address() {
        let (mut heap, bp) = heap_with_free_block(256);
        heap.write_free(bp, 64, true);
        heap.write_allocated(bp + 64, 64, false);
        heap.write_free(bp + 128, 128, true);
        let mut strategy = FirstFit;
        assert_eq!(strategy.find_fit(&heap, 48), Some(bp));
        assert_eq!(strategy.find_fit(&heap, 72), Some(bp + 128));
        assert_eq!(strategy.find_fit(&heap, 136), None);
        assert_eq!(strategy.check(&heap), Ok(2));
    }

    #[test]
    fn test_next_fit_resumes_from_rover_and_wraps() {
        let (mut heap, bp) = heap_with_free_block(256);
        heap.write_free(bp, 64, true);
        heap.write_allocated(bp + 64, 64, false);
        heap.write_free(bp + 128, 128, true);
        let mut strategy = NextFit::default();
        assert_eq!(strategy.find_fit(&heap, 100), Some(bp + 128));
        assert_eq!(strategy.rover(), bp + 128);
        // Wraps back to the front once nothing past the rover fits.
        heap.write_allocated(bp + 128, 128, true);
        assert_eq!(strategy.find_fit(&heap, 32), Some(bp));
        strategy.on_merge(bp - 8, bp);
        assert_eq!(strategy.rover(), bp - 8);
    }

    #[test]
    fn test_list_fit_overflows_to_larger_class() {
        let (mut heap, bp) = heap_with_free_block(1024);
        let mut strategy = ListFit::segregated();
        strategy.insert(&mut heap, bp);
        assert_eq!(strategy.find_fit(&heap, 24), Some(bp));
        assert_eq!(strategy.find_fit(&heap, 2048), None);
        assert_eq!(strategy.class_of(1024), Some(17));
        strategy.remove(&mut heap, bp);
        assert_eq!(strategy.find_fit(&heap, 24), None);
        assert_eq!(strategy.check(&heap), Ok(0));
    }
}
