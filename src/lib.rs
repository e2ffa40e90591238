//! Parallel lexicographic sorting of large string sets.
//!
//! Strsort sorts arrays of [`StringRef`] handles (pointers into an
//! immutable, NUL-terminated byte heap) using all available cores. Two
//! algorithms share a work-stealing job queue:
//!
//! - **Parallel multikey quicksort**: ternary partition over cached 8-byte
//!   key windows, streamed through fixed-size record blocks, with
//!   work-sharing between the queue's workers.
//! - **Super-scalar sample sort**: a cache-sized splitter tree classifies
//!   strings into `2k + 1` buckets per pass via branch-free tree descent,
//!   with MSD radix sort below the smallsort threshold.
//!
//! Both exploit shared prefixes: a subset whose strings agree on their
//! first `depth` bytes is refined using the next eight bytes at once, so
//! each byte of a string is examined close to once overall.
//!
//! ```
//! use strsort::{sort, StringHeap};
//!
//! let mut heap = StringHeap::new();
//! let banana = heap.add(b"banana");
//! let apple = heap.add(b"apple");
//! let cherry = heap.add(b"cherry");
//!
//! let mut strings = vec![banana, apple, cherry];
//! sort(&mut strings, 0);
//! assert_eq!(strings, vec![apple, banana, cherry]);
//! ```
//!
//! Sorting is **not stable**: equal strings may end up in any relative
//! order.

#![warn(rust_2018_idioms)]

mod cache;
mod driver;
mod insertion;
mod mkqs;
mod parallel_mkqs;
mod parallel_sample_sort;
mod radix;
mod sample_sort;
mod string_set;

pub use crate::string_set::{StringHeap, StringRef};

/// Which engine a sort runs on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Algorithm {
    /// Parallel multikey quicksort with 8-byte key caching (the default).
    ParallelMkqs,
    /// Parallel super-scalar sample sort.
    SampleSort,
}

/// Configuration for a sort run. The defaults match the tuning the
/// algorithms were developed with; most callers only ever touch
/// [`num_threads`](SortConfig::num_threads).
#[derive(Clone, Debug)]
pub struct SortConfig {
    pub(crate) algorithm: Algorithm,
    pub(crate) insertion_threshold: usize,
    pub(crate) smallsort_threshold: usize,
    pub(crate) block_size: usize,
    pub(crate) l2_cache_hint: usize,
    pub(crate) num_threads: usize,
    pub(crate) oversample_factor: usize,
    pub(crate) seed: u64,
}

impl Default for SortConfig {
    fn default() -> SortConfig {
        SortConfig {
            algorithm: Algorithm::ParallelMkqs,
            insertion_threshold: 32,
            smallsort_threshold: 1024,
            block_size: 128 * 1024,
            l2_cache_hint: 256 * 1024,
            num_threads: 0,
            oversample_factor: 2,
            seed: 0,
        }
    }
}

impl SortConfig {
    /// A configuration with all defaults.
    pub fn new() -> SortConfig {
        SortConfig::default()
    }

    /// Selects the sorting engine.
    pub fn algorithm(mut self, algorithm: Algorithm) -> SortConfig {
        self.algorithm = algorithm;
        self
    }

    /// Subproblems below this record count go straight to insertion sort.
    pub fn insertion_threshold(mut self, threshold: usize) -> SortConfig {
        self.insertion_threshold = threshold;
        self
    }

    /// Sample-sort subsets below this size fall back to MSD radix sort.
    pub fn smallsort_threshold(mut self, threshold: usize) -> SortConfig {
        self.smallsort_threshold = threshold;
        self
    }

    /// Record capacity of the blocks streamed between partition workers.
    pub fn block_size(mut self, records: usize) -> SortConfig {
        self.block_size = records;
        self
    }

    /// Cache budget, in bytes, that sizes the sample-sort splitter tree.
    pub fn l2_cache_hint(mut self, bytes: usize) -> SortConfig {
        self.l2_cache_hint = bytes;
        self
    }

    /// Worker thread count. Zero (the default) uses the `STRSORT_THREADS`
    /// environment variable if set, otherwise one worker per logical CPU.
    pub fn num_threads(mut self, num_threads: usize) -> SortConfig {
        self.num_threads = num_threads;
        self
    }

    /// Oversampling factor for splitter selection.
    pub fn oversample_factor(mut self, factor: usize) -> SortConfig {
        self.oversample_factor = factor;
        self
    }

    /// Seed for splitter sampling. Sorting is fully deterministic for a
    /// fixed seed, independent of the thread count.
    pub fn seed(mut self, seed: u64) -> SortConfig {
        self.seed = seed;
        self
    }

    /// Sorts `strings` lexicographically by their underlying bytes,
    /// treating the first `start_depth` bytes of every string as already
    /// known equal.
    ///
    /// Every handle must point at a NUL-terminated byte sequence that stays
    /// valid and unmodified for the duration of the call; all strings must
    /// actually agree on their first `start_depth` bytes. On return the
    /// slice is a lexicographically non-decreasing permutation of itself.
    /// Equal strings may be reordered (the sort is not stable).
    ///
    /// # Panics
    ///
    /// Panics if the worker threads cannot be spawned.
    pub fn sort(&self, strings: &mut [StringRef], start_depth: usize) {
        driver::sort(self, strings, start_depth)
    }
}

/// Sorts `strings` with the default configuration; see
/// [`SortConfig::sort`].
pub fn sort(strings: &mut [StringRef], start_depth: usize) {
    SortConfig::new().sort(strings, start_depth)
}
