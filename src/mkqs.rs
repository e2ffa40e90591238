//! Sequential multikey quicksort over cached 8-byte keys.
//!
//! One step refills the key cache if needed, picks a median-of-nine pivot,
//! runs a Bentley–McIlroy ternary partition, and leaves `[lt | eq | gt]`
//! layout behind. The driver around it is iterative (an explicit frame
//! stack) and cooperates with the job queue: while other workers are idle,
//! the bottom stack frame's pending children are exported as independent
//! jobs that share the cache buffer through a reference-counted arena.

use std::sync::Arc;

use strsort_core::{Job, JobQueue};

use crate::cache::{BlockQueue, CacheArena, StrCache};
use crate::driver::Context;
use crate::insertion::insertion_sort;
use crate::string_set::{Key, StringSet, KEY_LEN};

/// Median of three keys, by value. Used for pivot selection over sampled
/// keys; ties resolve like the indexed variant below.
pub(crate) fn med3(a: Key, b: Key, c: Key) -> Key {
    if a == b {
        return a;
    }
    if c == a || c == b {
        return c;
    }
    if a < b {
        if b < c {
            return b;
        }
        if a < c {
            return c;
        }
        return a;
    }
    if b > c {
        return b;
    }
    if a < c {
        return a;
    }
    c
}

/// Median of three records by key, returning the winning index.
fn med3_idx(cache: &[StrCache], a: usize, b: usize, c: usize) -> usize {
    let (ka, kb, kc) = (cache[a].key, cache[b].key, cache[c].key);
    if ka == kb {
        return a;
    }
    if kc == ka || kc == kb {
        return c;
    }
    if ka < kb {
        if kb < kc {
            return b;
        }
        if ka < kc {
            return c;
        }
        return a;
    }
    if kb > kc {
        return b;
    }
    if ka < kc {
        return a;
    }
    c
}

/// Median-of-nine over the fixed sampling positions, as nested
/// medians-of-three. Requires `n >= 4`; smaller inputs never reach the
/// partition (they go to insertion sort).
fn median_of_nine_idx(cache: &[StrCache], n: usize) -> usize {
    debug_assert!(n >= 4);
    med3_idx(
        cache,
        med3_idx(cache, 0, n / 8, n / 4),
        med3_idx(cache, n / 2 - n / 8, n / 2, n / 2 + n / 8),
        med3_idx(cache, n - 1 - n / 4, n - 1 - n / 8, n - 3),
    )
}

/// Median-of-nine over an arbitrary key sample, degrading gracefully for
/// small samples (pivot queues may hold only a few block samples).
pub(crate) fn median_of_nine_keys(keys: &[Key]) -> Key {
    let p = keys.len();
    assert!(p > 0);
    if p >= 9 {
        med3(
            med3(keys[0], keys[p / 8], keys[p / 4]),
            med3(keys[p / 2 - p / 8], keys[p / 2], keys[p / 2 + p / 8]),
            med3(keys[p - 1 - p / 4], keys[p - 1 - p / 8], keys[p - 3]),
        )
    } else if p >= 3 {
        med3(keys[0], keys[p / 2], keys[p - 1])
    } else {
        keys[p / 2]
    }
}

/// One ternary partition step over a frame of the cache.
struct MkqsStep {
    /// Frame offset within the job's arena (absolute).
    off: usize,
    depth: usize,
    num_lt: usize,
    num_eq: usize,
    num_gt: usize,
    /// Next child to process: 0 = lt, 1 = eq, 2 = gt.
    idx: usize,
    eq_recurse: bool,
}

impl MkqsStep {
    /// Partitions `cache` around a median-of-nine pivot. On return the
    /// frame's records are laid out `[lt | eq | gt]`.
    fn new(cache: &mut [StrCache], off: usize, depth: usize, cache_dirty: bool) -> MkqsStep {
        let n = cache.len();

        if cache_dirty {
            for rec in cache.iter_mut() {
                rec.key = rec.str.key_at(depth);
            }
        }

        // Park the pivot in slot 0: the partition indices walk rightward
        // from slot 1, so the unsigned walkers can never wrap below it.
        let m = median_of_nine_idx(cache, n);
        cache.swap(0, m);
        let pivot = cache[0].key;

        let mut first = 1;
        let mut last = n - 1;
        let mut beg_ins = 1;
        let mut end_ins = n - 1;
        loop {
            while first <= last {
                let k = cache[first].key;
                if k > pivot {
                    break;
                }
                if k == pivot {
                    cache.swap(beg_ins, first);
                    beg_ins += 1;
                }
                first += 1;
            }
            while first <= last {
                let k = cache[last].key;
                if k < pivot {
                    break;
                }
                if k == pivot {
                    cache.swap(end_ins, last);
                    end_ins -= 1;
                }
                last -= 1;
            }
            if first > last {
                break;
            }
            cache.swap(first, last);
            first += 1;
            last -= 1;
        }

        let num_eq_beg = beg_ins;
        let num_eq_end = n - 1 - end_ins;
        let num_eq = num_eq_beg + num_eq_end;
        let num_lt = first - beg_ins;
        let num_gt = end_ins - last;

        // swap the equal runs from both ends into the middle
        let size1 = num_eq_beg.min(num_lt);
        for i in 0..size1 {
            cache.swap(i, first - size1 + i);
        }
        let size2 = num_eq_end.min(num_gt);
        for i in 0..size2 {
            cache.swap(first + i, n - size2 + i);
        }

        MkqsStep {
            off,
            depth,
            num_lt,
            num_eq,
            num_gt,
            idx: 0,
            eq_recurse: pivot & 0xFF != 0,
        }
    }
}

/// Where a sequential job's records come from.
pub(crate) enum SeqInput {
    /// Drain a parent partition's output queue into a fresh arena.
    Blocks(Arc<BlockQueue>),
    /// A range of an arena shared with sibling jobs after work-sharing.
    Cache {
        arena: Arc<CacheArena>,
        off: usize,
        len: usize,
    },
    /// Build the arena directly from the string set (driver fast path).
    Fresh,
}

/// Sorts its subset with cached multikey quicksort and writes the string
/// references back. `CACHE_DIRTY` says whether the incoming keys are stale
/// for this job's depth.
pub(crate) struct SequentialJob<const CACHE_DIRTY: bool> {
    pub(crate) ctx: Arc<Context>,
    pub(crate) strset: StringSet,
    pub(crate) depth: usize,
    pub(crate) input: SeqInput,
}

impl<const CACHE_DIRTY: bool> Job for SequentialJob<CACHE_DIRTY> {
    fn run(self: Box<Self>, queue: &JobQueue) {
        let n = self.strset.size();
        match self.input {
            SeqInput::Blocks(ref block_queue) => {
                if n <= 1 {
                    // nothing to sort; just drain the stray block
                    while let Some(blk) = block_queue.pop() {
                        debug_assert!(blk.fill() <= 1);
                        if blk.fill() == 1 {
                            self.strset.set(0, blk.string(0));
                        }
                    }
                    return;
                }

                let arena = Arc::new(CacheArena::for_records(n));
                {
                    let cache = unsafe { arena.slice_mut(0, n) };
                    let mut o = 0;
                    while let Some(blk) = block_queue.pop() {
                        for rec in &blk.cache {
                            cache[o] = if CACHE_DIRTY {
                                StrCache {
                                    key: rec.str.key_at(self.depth),
                                    str: rec.str,
                                }
                            } else {
                                *rec
                            };
                            o += 1;
                        }
                    }
                    assert_eq!(o, n, "block queue did not deliver the whole subset");
                }
                // keys were refilled while draining, so the cache is clean
                sequential_mkqs::<false>(
                    &self.ctx,
                    queue,
                    self.strset,
                    self.depth,
                    &arena,
                    0,
                    n,
                );
            }
            SeqInput::Cache {
                ref arena,
                off,
                len,
            } => {
                debug_assert_eq!(len, n);
                sequential_mkqs::<CACHE_DIRTY>(
                    &self.ctx,
                    queue,
                    self.strset,
                    self.depth,
                    arena,
                    off,
                    len,
                );
            }
            SeqInput::Fresh => {
                if n <= 1 {
                    return;
                }
                let arena = Arc::new(CacheArena::for_records(n));
                {
                    let cache = unsafe { arena.slice_mut(0, n) };
                    for (i, rec) in cache.iter_mut().enumerate() {
                        rec.str = self.strset.at(i);
                    }
                }
                // keys are unset: treat as dirty regardless of the marker
                sequential_mkqs::<true>(&self.ctx, queue, self.strset, self.depth, &arena, 0, n);
            }
        }
    }
}

/// Iterative MKQS over `arena[base_off .. base_off + len]`, mirroring the
/// subset `strset`. Exports work when other workers idle; on return, every
/// record this job remained responsible for has been copied back into the
/// string set.
fn sequential_mkqs<const CACHE_DIRTY: bool>(
    ctx: &Arc<Context>,
    queue: &JobQueue,
    strset: StringSet,
    depth: usize,
    arena: &Arc<CacheArena>,
    base_off: usize,
    len: usize,
) {
    debug_assert_eq!(strset.size(), len);

    if len < ctx.inssort_threshold {
        let cache = unsafe { arena.slice_mut(base_off, len) };
        insertion_sort(cache, depth, true);
        for (i, rec) in cache.iter().enumerate() {
            strset.set(i, rec.str);
        }
        return;
    }

    // A Vec with an explicit front index stands in for pop-front semantics;
    // frames below `pop_front` have been exported as independent jobs.
    let mut pop_front = 0;
    let mut stack: Vec<MkqsStep> = Vec::new();
    {
        let cache = unsafe { arena.slice_mut(base_off, len) };
        stack.push(MkqsStep::new(cache, base_off, depth, CACHE_DIRTY));
    }

    // Everything in `arena[base_off .. cache_finished]` stays this job's
    // responsibility and is copied back at the end.
    let mut cache_finished = base_off + len;

    'outer: while stack.len() > pop_front {
        while stack[stack.len() - 1].idx < 3 {
            if queue.has_idle() {
                // convert the bottom frame's pending children into jobs
                let st = &stack[pop_front];
                let rel = st.off - base_off;

                if st.idx == 0 && st.num_lt != 0 {
                    queue.enqueue(Box::new(SequentialJob::<false> {
                        ctx: Arc::clone(ctx),
                        strset: strset.subrange(rel, st.num_lt),
                        depth: st.depth,
                        input: SeqInput::Cache {
                            arena: Arc::clone(arena),
                            off: st.off,
                            len: st.num_lt,
                        },
                    }));
                }
                if st.idx <= 1 && st.num_eq != 0 {
                    if st.eq_recurse {
                        queue.enqueue(Box::new(SequentialJob::<true> {
                            ctx: Arc::clone(ctx),
                            strset: strset.subrange(rel + st.num_lt, st.num_eq),
                            depth: st.depth + KEY_LEN,
                            input: SeqInput::Cache {
                                arena: Arc::clone(arena),
                                off: st.off + st.num_lt,
                                len: st.num_eq,
                            },
                        }));
                    } else {
                        // terminator reached: the equal run is finished,
                        // copy it out instead of spawning a job
                        let cache =
                            unsafe { arena.slice_mut(st.off + st.num_lt, st.num_eq) };
                        for (i, rec) in cache.iter().enumerate() {
                            strset.set(rel + st.num_lt + i, rec.str);
                        }
                    }
                }
                if st.idx <= 2 && st.num_gt != 0 {
                    queue.enqueue(Box::new(SequentialJob::<false> {
                        ctx: Arc::clone(ctx),
                        strset: strset.subrange(rel + st.num_lt + st.num_eq, st.num_gt),
                        depth: st.depth,
                        input: SeqInput::Cache {
                            arena: Arc::clone(arena),
                            off: st.off + st.num_lt + st.num_eq,
                            len: st.num_gt,
                        },
                    }));
                }

                // this job is no longer responsible past the first child
                // that was handed off
                cache_finished = match st.idx {
                    0 => st.off,
                    1 => st.off + st.num_lt,
                    _ => st.off + st.num_lt + st.num_eq,
                };

                pop_front += 1;
                continue 'outer;
            }

            let top = stack.len() - 1;
            stack[top].idx += 1;
            let (off, n_lt, n_eq, n_gt, d, eq_recurse, idx) = {
                let ms = &stack[top];
                (
                    ms.off, ms.num_lt, ms.num_eq, ms.num_gt, ms.depth, ms.eq_recurse, ms.idx,
                )
            };

            match idx {
                1 => {
                    if n_lt == 0 {
                        continue;
                    }
                    let cache = unsafe { arena.slice_mut(off, n_lt) };
                    if n_lt < ctx.inssort_threshold {
                        insertion_sort(cache, d, false);
                    } else {
                        stack.push(MkqsStep::new(cache, off, d, false));
                    }
                }
                2 => {
                    if !eq_recurse || n_eq == 0 {
                        continue;
                    }
                    let cache = unsafe { arena.slice_mut(off + n_lt, n_eq) };
                    if n_eq < ctx.inssort_threshold {
                        insertion_sort(cache, d + KEY_LEN, true);
                    } else {
                        stack.push(MkqsStep::new(cache, off + n_lt, d + KEY_LEN, true));
                    }
                }
                _ => {
                    debug_assert_eq!(idx, 3);
                    if n_gt == 0 {
                        continue;
                    }
                    let cache = unsafe { arena.slice_mut(off + n_lt + n_eq, n_gt) };
                    if n_gt < ctx.inssort_threshold {
                        insertion_sort(cache, d, false);
                    } else {
                        stack.push(MkqsStep::new(cache, off + n_lt + n_eq, d, false));
                    }
                }
            }
        }

        stack.pop();
    }

    // copy the locally finished prefix back to the string set
    let n_finished = cache_finished - base_off;
    let cache = unsafe { arena.slice_mut(base_off, n_finished) };
    for (i, rec) in cache.iter().enumerate() {
        strset.set(i, rec.str);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string_set::{StringHeap, StringRef};
    use strsort_core::JobQueueBuilder;

    fn make_records(heap: &mut StringHeap, strs: &[&[u8]]) -> (Vec<StringRef>, Vec<StrCache>) {
        let refs: Vec<StringRef> = strs.iter().map(|s| heap.add(s)).collect();
        let cache = refs
            .iter()
            .map(|r| StrCache {
                key: r.key_at(0),
                str: *r,
            })
            .collect();
        (refs, cache)
    }

    #[test]
    fn med3_prefers_duplicates() {
        assert_eq!(med3(5, 5, 9), 5);
        assert_eq!(med3(1, 9, 9), 9);
        assert_eq!(med3(1, 5, 9), 5);
        assert_eq!(med3(9, 5, 1), 5);
    }

    #[test]
    fn median_of_nine_small_samples() {
        assert_eq!(median_of_nine_keys(&[4]), 4);
        assert_eq!(median_of_nine_keys(&[4, 8]), 8);
        assert_eq!(median_of_nine_keys(&[9, 1, 5]), 5);
        let keys: Vec<Key> = (0..100).collect();
        let m = median_of_nine_keys(&keys);
        assert!((25..=75).contains(&m));
    }

    #[test]
    fn step_partitions_into_three_ranges() {
        let mut heap = StringHeap::new();
        let strs: Vec<Vec<u8>> = (0..64u32).map(|i| format!("k{:03}", i * 7 % 64).into_bytes()).collect();
        let strs_ref: Vec<&[u8]> = strs.iter().map(|v| v.as_slice()).collect();
        let (_refs, mut cache) = make_records(&mut heap, &strs_ref);

        let n = cache.len();
        let step = MkqsStep::new(&mut cache, 0, 0, false);
        assert_eq!(step.num_lt + step.num_eq + step.num_gt, n);
        assert!(step.num_eq >= 1);

        let pivot = cache[step.num_lt].key;
        for rec in &cache[..step.num_lt] {
            assert!(rec.key < pivot);
        }
        for rec in &cache[step.num_lt..step.num_lt + step.num_eq] {
            assert_eq!(rec.key, pivot);
        }
        for rec in &cache[step.num_lt + step.num_eq..] {
            assert!(rec.key > pivot);
        }
    }

    #[test]
    fn step_refills_dirty_keys() {
        let mut heap = StringHeap::new();
        let (_refs, mut cache) = make_records(
            &mut heap,
            &(0..40)
                .map(|_| b"same".as_ref())
                .collect::<Vec<&[u8]>>(),
        );
        for rec in cache.iter_mut() {
            rec.key = 0xDEAD;
        }
        let step = MkqsStep::new(&mut cache, 0, 0, true);
        assert_eq!(step.num_eq, 40);
        assert!(!step.eq_recurse, "terminator within window must stop descent");
    }

    #[test]
    fn sequential_job_sorts_via_queue() {
        let mut heap = StringHeap::new();
        let mut expected: Vec<Vec<u8>> = (0..3000u32)
            .map(|i| format!("w{:06}", (i * 48271) % 100003).into_bytes())
            .collect();
        let mut strings: Vec<StringRef> = expected.iter().map(|s| heap.add(s)).collect();
        expected.sort();

        let ctx = Arc::new(Context::for_tests());
        let strset = StringSet::new(&mut strings);
        JobQueueBuilder::new()
            .num_threads(4)
            .run(|queue| {
                queue.enqueue(Box::new(SequentialJob::<true> {
                    ctx: Arc::clone(&ctx),
                    strset,
                    depth: 0,
                    input: SeqInput::Fresh,
                }));
            })
            .unwrap();

        for (s, e) in strings.iter().zip(&expected) {
            for (k, &byte) in e.iter().enumerate() {
                assert_eq!(s.byte_at(k), byte);
            }
            assert_eq!(s.byte_at(e.len()), 0);
        }
    }
}
