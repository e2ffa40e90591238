//! Parallel super-scalar sample sort.
//!
//! One step mirrors the parallel quicksort's job structure: a sample job
//! builds the splitter tree and fans out per-part classification jobs; a
//! countdown barrier separates classification from the global prefix sum,
//! the out-of-place distribution, and the copy-back; the last copy-back
//! worker runs the recursion phase. Oversized buckets respawn parallel
//! steps, everything else runs the sequential sorter (which bottoms out in
//! MSD radix sort).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use strsort_core::{Job, JobQueue};

use crate::cache::SharedVec;
use crate::driver::{self, Context};
use crate::sample_sort::{gather_samples, SplitterTree};
use crate::string_set::{StringRef, StringSet, KEY_LEN};

/// Shared state of one parallel sample-sort step.
pub(crate) struct SampleSortStep {
    ctx: Arc<Context>,
    strset: StringSet,
    depth: usize,

    /// Number of classification/distribution parts and the slice size of
    /// each.
    parts: usize,
    psize: usize,

    /// Phase countdown; the worker reaching zero advances the step.
    pwork: AtomicUsize,

    tree: SplitterTree,

    /// Per-part bucket counters, `parts * bktnum + 1` entries. After the
    /// prefix sum each entry is the exclusive end of that part's share of a
    /// bucket; after distribution part 0's row holds the bucket start
    /// boundaries.
    bkt: SharedVec<usize>,

    /// Each string's bucket id, written by its part's classification job.
    bktcache: SharedVec<u16>,

    /// Out-of-place destination buffer.
    sorted: SharedVec<StringRef>,
}

struct SampleJob {
    ctx: Arc<Context>,
    strset: StringSet,
    depth: usize,
}

struct CountJob {
    step: Arc<SampleSortStep>,
    p: usize,
}

struct DistributeJob {
    step: Arc<SampleSortStep>,
    p: usize,
}

struct CopybackJob {
    step: Arc<SampleSortStep>,
    p: usize,
}

/// Spawns a parallel sample-sort step over the subset.
pub(crate) fn enqueue_parallel(ctx: Arc<Context>, queue: &JobQueue, strset: StringSet, depth: usize) {
    queue.enqueue(Box::new(SampleJob { ctx, strset, depth }));
}

impl Job for SampleJob {
    fn run(self: Box<Self>, queue: &JobQueue) {
        let n = self.strset.size();
        let parts = self.ctx.num_threads.max(1);
        let psize = (n + parts - 1) / parts;

        let num = SplitterTree::leaves_for(self.ctx.l2_cache);
        let mut samples = gather_samples(&self.ctx, self.strset, self.depth, num);
        let tree = SplitterTree::build(&mut samples, num, self.ctx.oversample);
        let bktnum = tree.bktnum();

        let step = Arc::new(SampleSortStep {
            ctx: self.ctx,
            strset: self.strset,
            depth: self.depth,
            parts,
            psize,
            pwork: AtomicUsize::new(parts),
            tree,
            bkt: SharedVec::new(bktnum * parts + 1, 0),
            bktcache: SharedVec::new(n, 0),
            sorted: SharedVec::new(n, StringRef::null()),
        });

        for p in 0..parts {
            queue.enqueue(Box::new(CountJob {
                step: Arc::clone(&step),
                p,
            }));
        }
    }
}

impl SampleSortStep {
    /// This part's slice of the subset.
    fn part_range(&self, p: usize) -> (usize, usize) {
        let n = self.strset.size();
        let begin = (p * self.psize).min(n);
        let end = ((p + 1) * self.psize).min(n);
        (begin, end)
    }

    fn count(step: &Arc<SampleSortStep>, p: usize, queue: &JobQueue) {
        let (begin, end) = step.part_range(p);
        let bktnum = step.tree.bktnum();

        {
            // this part exclusively owns its bkt row and bktcache segment
            let mybkt = unsafe { step.bkt.slice_mut(p * bktnum, bktnum) };
            let mybktcache = unsafe { step.bktcache.slice_mut(begin, end - begin) };

            for (i, slot) in mybktcache.iter_mut().enumerate() {
                let key = step.strset.get_u64(step.strset.at(begin + i), step.depth);
                let b = step.tree.classify(key);
                *slot = b;
                mybkt[b as usize] += 1;
            }
        }

        if step.pwork.fetch_sub(1, Ordering::SeqCst) == 1 {
            SampleSortStep::count_finished(step, queue);
        }
    }

    fn count_finished(step: &Arc<SampleSortStep>, queue: &JobQueue) {
        let n = step.strset.size();
        let bktnum = step.tree.bktnum();

        {
            // inclusive prefix sum, bucket-major over the parts: each entry
            // becomes the exclusive end of that (part, bucket) share
            let bkt = unsafe { step.bkt.slice_mut(0, bktnum * step.parts) };
            let mut sum = 0;
            for i in 0..bktnum {
                for p in 0..step.parts {
                    let idx = p * bktnum + i;
                    sum += bkt[idx];
                    bkt[idx] = sum;
                }
            }
            assert_eq!(sum, n, "classification lost records");
        }

        step.pwork.store(step.parts, Ordering::SeqCst);
        for p in 0..step.parts {
            queue.enqueue(Box::new(DistributeJob {
                step: Arc::clone(step),
                p,
            }));
        }
    }

    fn distribute(step: &Arc<SampleSortStep>, p: usize, queue: &JobQueue) {
        let (begin, end) = step.part_range(p);
        let bktnum = step.tree.bktnum();

        {
            let mybkt = unsafe { step.bkt.slice_mut(p * bktnum, bktnum) };
            let mybktcache = unsafe { step.bktcache.slice_mut(begin, end - begin) };

            // writes land in this part's reserved span of every bucket
            for (i, &b) in mybktcache.iter().enumerate() {
                mybkt[b as usize] -= 1;
                unsafe {
                    step.sorted
                        .write(mybkt[b as usize], step.strset.at(begin + i));
                }
            }
        }

        if step.pwork.fetch_sub(1, Ordering::SeqCst) == 1 {
            SampleSortStep::distribute_finished(step, queue);
        }
    }

    fn distribute_finished(step: &Arc<SampleSortStep>, queue: &JobQueue) {
        step.pwork.store(step.parts, Ordering::SeqCst);
        for p in 0..step.parts {
            queue.enqueue(Box::new(CopybackJob {
                step: Arc::clone(step),
                p,
            }));
        }
    }

    fn copyback(&self, p: usize, queue: &JobQueue) {
        let (begin, end) = self.part_range(p);
        for i in begin..end {
            self.strset.set(i, unsafe { self.sorted.read(i) });
        }

        if self.pwork.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.copyback_finished(queue);
        }
    }

    fn copyback_finished(&self, queue: &JobQueue) {
        let n = self.strset.size();
        let bktnum = self.tree.bktnum();

        // Part 0's counters were decremented down to each bucket's global
        // start; append the total as a sentinel (the rows are dead now) so
        // sizes read uniformly as boundary differences.
        let bkt = unsafe { self.bkt.slice_mut(0, bktnum + 1) };
        bkt[bktnum] = n;

        let mut i = 0;
        while i < bktnum - 1 {
            // even index: less-than bucket
            let size = bkt[i + 1] - bkt[i];
            if size > 1 {
                driver::enqueue_sample_sort(
                    Arc::clone(&self.ctx),
                    queue,
                    self.strset.subrange(bkt[i], size),
                    self.depth + self.tree.lcp(i / 2),
                );
            }
            i += 1;

            // odd index: equal bucket
            let size = bkt[i + 1] - bkt[i];
            if size > 1 {
                if self.tree.splitter(i / 2) & 0xFF == 0 {
                    // terminator inside the splitter window: bucket done
                } else {
                    driver::enqueue_sample_sort(
                        Arc::clone(&self.ctx),
                        queue,
                        self.strset.subrange(bkt[i], size),
                        self.depth + KEY_LEN,
                    );
                }
            }
            i += 1;
        }

        let size = n - bkt[bktnum - 1];
        if size > 1 {
            driver::enqueue_sample_sort(
                Arc::clone(&self.ctx),
                queue,
                self.strset.subrange(bkt[bktnum - 1], size),
                self.depth,
            );
        }
    }
}

impl Job for CountJob {
    fn run(self: Box<Self>, queue: &JobQueue) {
        SampleSortStep::count(&self.step, self.p, queue);
    }
}

impl Job for DistributeJob {
    fn run(self: Box<Self>, queue: &JobQueue) {
        SampleSortStep::distribute(&self.step, self.p, queue);
    }
}

impl Job for CopybackJob {
    fn run(self: Box<Self>, queue: &JobQueue) {
        self.step.copyback(self.p, queue);
    }
}
