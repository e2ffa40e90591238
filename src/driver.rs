//! Top-level driver: resolves the configuration into a per-sort context,
//! seeds the job queue with the chosen algorithm's root job, and waits for
//! quiescence.

use std::sync::Arc;

use strsort_core::{Job, JobQueue, JobQueueBuilder};

use crate::mkqs::{SeqInput, SequentialJob};
use crate::parallel_mkqs;
use crate::parallel_sample_sort;
use crate::sample_sort;
use crate::string_set::{StringRef, StringSet};
use crate::{Algorithm, SortConfig};

/// Knobs resolved against a concrete input size, shared by all jobs of one
/// sort through an `Arc`.
pub(crate) struct Context {
    pub(crate) inssort_threshold: usize,
    pub(crate) smallsort_threshold: usize,
    pub(crate) block_size: usize,
    pub(crate) l2_cache: usize,
    pub(crate) oversample: usize,
    pub(crate) seed: u64,
    pub(crate) num_threads: usize,
    /// Subsets at or below this size are handed to one sequential job.
    pub(crate) sequential_threshold: usize,
    /// Sample-sort subsets above this size get a parallel step.
    pub(crate) parallel_threshold: usize,
}

impl Context {
    fn resolve(config: &SortConfig, n: usize) -> Context {
        let num_threads = if config.num_threads > 0 {
            config.num_threads
        } else {
            strsort_core::default_num_threads()
        };
        // the partition's nine sampling positions need a few records to
        // draw from; anything smaller belongs in insertion sort anyway
        let inssort_threshold = config.insertion_threshold.max(4);
        Context {
            inssort_threshold,
            smallsort_threshold: config.smallsort_threshold.max(inssort_threshold),
            block_size: config.block_size.max(1),
            l2_cache: config.l2_cache_hint,
            oversample: config.oversample_factor.max(1),
            seed: config.seed,
            num_threads,
            sequential_threshold: inssort_threshold.max(n / num_threads),
            parallel_threshold: config.smallsort_threshold.max(n / num_threads),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Context {
        Context {
            inssort_threshold: 16,
            smallsort_threshold: 64,
            block_size: 128,
            l2_cache: 16 * 1024,
            oversample: 2,
            seed: 0,
            num_threads: 4,
            sequential_threshold: 64,
            parallel_threshold: 256,
        }
    }
}

/// Multikey-quicksort entry: small subsets become one sequential job with a
/// freshly built cache, larger ones a parallel partition step.
pub(crate) fn enqueue_mkqs(ctx: Arc<Context>, queue: &JobQueue, strset: StringSet, depth: usize) {
    if strset.size() <= 1 {
        return;
    }
    if strset.size() <= ctx.sequential_threshold || ctx.num_threads == 1 {
        queue.enqueue(Box::new(SequentialJob::<true> {
            ctx,
            strset,
            depth,
            input: SeqInput::Fresh,
        }));
    } else {
        parallel_mkqs::enqueue_input(ctx, queue, strset, depth);
    }
}

/// Sample-sort entry, also used by the parallel step's recursion phase:
/// oversized buckets respawn parallel steps, the rest run the sequential
/// sorter in a single job.
pub(crate) fn enqueue_sample_sort(
    ctx: Arc<Context>,
    queue: &JobQueue,
    strset: StringSet,
    depth: usize,
) {
    if strset.size() <= 1 {
        return;
    }
    if strset.size() > ctx.parallel_threshold && ctx.num_threads > 1 {
        parallel_sample_sort::enqueue_parallel(ctx, queue, strset, depth);
    } else {
        queue.enqueue(Box::new(SmallSortJob { ctx, strset, depth }));
    }
}

struct SmallSortJob {
    ctx: Arc<Context>,
    strset: StringSet,
    depth: usize,
}

impl Job for SmallSortJob {
    fn run(self: Box<Self>, _queue: &JobQueue) {
        sample_sort::sample_sort(&self.ctx, self.strset, self.depth);
    }
}

pub(crate) fn sort(config: &SortConfig, strings: &mut [StringRef], depth: usize) {
    let n = strings.len();
    if n <= 1 {
        return;
    }

    let ctx = Arc::new(Context::resolve(config, n));
    let strset = StringSet::new(strings);
    let num_threads = ctx.num_threads;

    let result = JobQueueBuilder::new()
        .num_threads(num_threads)
        .run(|queue| match config.algorithm {
            Algorithm::ParallelMkqs => enqueue_mkqs(Arc::clone(&ctx), queue, strset, depth),
            Algorithm::SampleSort => enqueue_sample_sort(Arc::clone(&ctx), queue, strset, depth),
        });

    if let Err(e) = result {
        panic!("failed to start sort workers: {}", e);
    }
}
