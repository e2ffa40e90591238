//! Parallel multikey quicksort: a block-stream ternary partition.
//!
//! A partition step owns a pivot and three lock-free output queues. Each of
//! its workers pulls input blocks from a shared source and keeps one
//! in-flight block per side, swapping records between block heads so that a
//! full block ends up containing records of a single side and is published
//! to that side's queue together with a mid-block pivot sample. The worker
//! that decrements the step's countdown to zero runs the recursion phase:
//! each side becomes a sequential job (small), a fresh parallel step
//! (large), or, for an equal bucket whose pivot carries the terminator, a
//! plain copy back into the string set.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use strsort_core::{Job, JobQueue};

use crate::cache::{BlockQueue, CacheBlock, PivotQueue, StrCache};
use crate::driver::Context;
use crate::mkqs::{med3, median_of_nine_keys, SeqInput, SequentialJob};
use crate::string_set::{Key, StringSet, KEY_LEN};

const LT: usize = 0;
const EQ: usize = 1;
const GT: usize = 2;

/// Produces the input blocks of one partition step.
pub(crate) trait BlockSource: Send + Sync + 'static {
    fn strset(&self) -> StringSet;
    fn depth(&self) -> usize;
    /// Called once, before the partition workers start.
    fn select_pivot(&mut self) -> Key;
    /// Hands out the next input block, or `None` once the source is drained.
    fn get_block(&self) -> Option<Box<CacheBlock>>;
}

/// Fresh sort: blocks are carved out of the string set by an atomic cursor
/// and their keys are read at the current depth.
pub(crate) struct InputBlockSource {
    strset: StringSet,
    depth: usize,
    block_size: usize,
    block_count: usize,
    block_current: AtomicUsize,
}

impl InputBlockSource {
    pub(crate) fn new(strset: StringSet, depth: usize, block_size: usize) -> InputBlockSource {
        let block_count = (strset.size() + block_size - 1) / block_size;
        InputBlockSource {
            strset,
            depth,
            block_size,
            block_count,
            block_current: AtomicUsize::new(0),
        }
    }

    fn get_direct(&self, i: usize) -> Key {
        self.strset.get_u64(self.strset.at(i), self.depth)
    }
}

impl BlockSource for InputBlockSource {
    fn strset(&self) -> StringSet {
        self.strset
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn select_pivot(&mut self) -> Key {
        let n = self.strset.size();
        med3(
            med3(self.get_direct(0), self.get_direct(n / 8), self.get_direct(n / 4)),
            med3(
                self.get_direct(n / 2 - n / 8),
                self.get_direct(n / 2),
                self.get_direct(n / 2 + n / 8),
            ),
            med3(
                self.get_direct(n - 1 - n / 4),
                self.get_direct(n - 1 - n / 8),
                self.get_direct(n - 3),
            ),
        )
    }

    fn get_block(&self) -> Option<Box<CacheBlock>> {
        // reserve the next unread chunk
        let blk = self.block_current.fetch_add(1, Ordering::Relaxed);
        if blk >= self.block_count {
            return None;
        }
        let begin = blk * self.block_size;
        let fill = self.block_size.min(self.strset.size() - begin);

        let mut scb = CacheBlock::with_capacity(self.block_size);
        for i in begin..begin + fill {
            let s = self.strset.at(i);
            scb.cache.push(StrCache {
                key: self.strset.get_u64(s, self.depth),
                str: s,
            });
        }
        Some(scb)
    }
}

/// Recursive step: blocks arrive from a parent's output queue. With
/// `REFILL` the step descended into an equal bucket, the depth advanced by
/// a key length, and every block's keys are recomputed on acquisition;
/// otherwise the parent's keys are still valid and are reused.
pub(crate) struct QueueBlockSource<const REFILL: bool> {
    strset: StringSet,
    depth: usize,
    block_queue: Arc<BlockQueue>,
    pivot_queue: Arc<PivotQueue>,
}

impl<const REFILL: bool> QueueBlockSource<REFILL> {
    pub(crate) fn new(
        strset: StringSet,
        depth: usize,
        block_queue: Arc<BlockQueue>,
        pivot_queue: Arc<PivotQueue>,
    ) -> QueueBlockSource<REFILL> {
        QueueBlockSource {
            strset,
            depth,
            block_queue,
            pivot_queue,
        }
    }
}

impl<const REFILL: bool> BlockSource for QueueBlockSource<REFILL> {
    fn strset(&self) -> StringSet {
        self.strset
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn select_pivot(&mut self) -> Key {
        // each parent block contributed one sample
        let mut pivots = Vec::with_capacity(16);
        while let Some(k) = self.pivot_queue.pop() {
            pivots.push(k);
        }
        median_of_nine_keys(&pivots)
    }

    fn get_block(&self) -> Option<Box<CacheBlock>> {
        let mut blk = self.block_queue.pop()?;
        if REFILL {
            for rec in blk.cache.iter_mut() {
                rec.key = rec.str.key_at(self.depth);
            }
        }
        Some(blk)
    }
}

/// One parallel partition step; shared by its partition workers.
pub(crate) struct ParallelStep<S: BlockSource> {
    ctx: Arc<Context>,
    blks: S,
    pivot: Key,

    /// Countdown of partition workers; the one reaching zero recurses.
    pwork: AtomicUsize,

    oblk_lt: Arc<BlockQueue>,
    oblk_eq: Arc<BlockQueue>,
    oblk_gt: Arc<BlockQueue>,
    opiv_lt: Arc<PivotQueue>,
    opiv_eq: Arc<PivotQueue>,
    opiv_gt: Arc<PivotQueue>,

    /// Records pushed into the lt/eq queues; fenced by the `pwork` barrier.
    count_lt: AtomicUsize,
    count_eq: AtomicUsize,
}

struct PartitionJob<S: BlockSource> {
    step: Arc<ParallelStep<S>>,
}

impl<S: BlockSource> Job for PartitionJob<S> {
    fn run(self: Box<Self>, queue: &JobQueue) {
        self.step.partition(queue);
    }
}

/// Spawns a partition step over `blks` onto the queue.
pub(crate) fn enqueue_parallel<S: BlockSource>(ctx: Arc<Context>, queue: &JobQueue, mut blks: S) {
    let n = blks.strset().size();
    let pivot = blks.select_pivot();
    let procs = (n / ctx.sequential_threshold).max(1);

    let step = Arc::new(ParallelStep {
        ctx,
        blks,
        pivot,
        pwork: AtomicUsize::new(procs),
        oblk_lt: Arc::new(BlockQueue::new()),
        oblk_eq: Arc::new(BlockQueue::new()),
        oblk_gt: Arc::new(BlockQueue::new()),
        opiv_lt: Arc::new(PivotQueue::new()),
        opiv_eq: Arc::new(PivotQueue::new()),
        opiv_gt: Arc::new(PivotQueue::new()),
        count_lt: AtomicUsize::new(0),
        count_eq: AtomicUsize::new(0),
    });

    for _ in 0..procs {
        queue.enqueue(Box::new(PartitionJob {
            step: Arc::clone(&step),
        }));
    }
}

/// Fresh-sort entry: partition the whole subset from the input source.
pub(crate) fn enqueue_input(ctx: Arc<Context>, queue: &JobQueue, strset: StringSet, depth: usize) {
    let block_size = ctx.block_size;
    enqueue_parallel(ctx, queue, InputBlockSource::new(strset, depth, block_size));
}

/// A worker's in-flight block for one side: records `[0, pos)` are
/// classified, `[pos, fill)` still unknown. `partial` marks extra blocks
/// allocated during redistribution, which only ever hold classified records.
struct PartState {
    pos: usize,
    blk: Option<Box<CacheBlock>>,
    partial: bool,
}

impl PartState {
    fn new() -> PartState {
        PartState {
            pos: 0,
            blk: None,
            partial: false,
        }
    }

    #[inline]
    fn fill(&self) -> usize {
        self.blk.as_ref().map_or(0, |b| b.fill())
    }

    #[inline]
    fn front_key(&self) -> Key {
        self.blk.as_ref().unwrap().key(self.pos)
    }

    /// Removes the record at `pos`, compacting from the back.
    fn take_front(&mut self) -> StrCache {
        let blk = self.blk.as_mut().unwrap();
        let rec = blk.cache[self.pos];
        let last = blk.cache.pop().unwrap();
        if self.pos < blk.cache.len() {
            blk.cache[self.pos] = last;
        }
        rec
    }

    /// Appends a classified record into the free area.
    fn push_classified(&mut self, rec: StrCache) {
        let blk = self.blk.as_mut().unwrap();
        debug_assert_eq!(self.pos, blk.cache.len());
        debug_assert!(blk.cache.len() < blk.cache.capacity());
        blk.cache.push(rec);
        self.pos += 1;
    }
}

fn two_mut(states: &mut [PartState; 3], i: usize, j: usize) -> (&mut PartState, &mut PartState) {
    debug_assert!(i != j && i < 3 && j < 3);
    let ptr = states.as_mut_ptr();
    unsafe { (&mut *ptr.add(i), &mut *ptr.add(j)) }
}

fn swap_fronts(a: &mut PartState, b: &mut PartState) {
    let (apos, bpos) = (a.pos, b.pos);
    let ablk = a.blk.as_mut().unwrap();
    let bblk = b.blk.as_mut().unwrap();
    std::mem::swap(&mut ablk.cache[apos], &mut bblk.cache[bpos]);
}

impl<S: BlockSource> ParallelStep<S> {
    fn oblk_push(&self, side: usize, blk: Box<CacheBlock>) {
        let fill = blk.fill();
        debug_assert!(fill > 0);
        match side {
            LT => {
                self.count_lt.fetch_add(fill, Ordering::Relaxed);
                self.opiv_lt.push(blk.key(fill / 2));
                self.oblk_lt.push(blk);
            }
            EQ => {
                self.count_eq.fetch_add(fill, Ordering::Relaxed);
                // the equal bucket recurses a key deeper, so its sample is
                // read one window further into the string; skip it when the
                // pivot carries the terminator and no recursion will happen
                if self.pivot & 0xFF != 0 {
                    self.opiv_eq
                        .push(blk.string(fill / 2).key_at(self.depth() + KEY_LEN));
                }
                self.oblk_eq.push(blk);
            }
            _ => {
                self.opiv_gt.push(blk.key(fill / 2));
                self.oblk_gt.push(blk);
            }
        }
    }

    fn depth(&self) -> usize {
        self.blks.depth()
    }

    /// True while `side` has a record to look at; pulls and publishes
    /// blocks as needed.
    fn has_src_block(&self, states: &mut [PartState; 3], side: usize) -> bool {
        if states[side].pos < states[side].fill() {
            return true;
        }

        let newblk = self.blks.get_block();
        let st = &mut states[side];
        if newblk.is_some() || st.fill() == self.ctx.block_size {
            // the current block is fully classified; hand it off
            if let Some(blk) = st.blk.take() {
                debug_assert_eq!(st.pos, blk.fill());
                if blk.fill() > 0 {
                    self.oblk_push(side, blk);
                }
            }
            st.pos = 0;
            match newblk {
                Some(b) => {
                    let nonempty = b.fill() > 0;
                    st.blk = Some(b);
                    nonempty
                }
                None => {
                    st.blk = None;
                    false
                }
            }
        } else {
            // keep the partial block; it still has free space for phase 2
            false
        }
    }

    fn check_partial_block(&self, states: &mut [PartState; 3], side: usize) {
        let st = &mut states[side];
        if st.blk.is_some() && st.pos < self.ctx.block_size {
            return;
        }
        if let Some(blk) = st.blk.take() {
            if blk.fill() > 0 {
                self.oblk_push(side, blk);
            }
        }
        st.pos = 0;
        st.blk = Some(CacheBlock::with_capacity(self.ctx.block_size));
        st.partial = true;
    }

    /// Moves the misplaced front record of `from` into `to`, either by
    /// swapping against `to`'s unknown head, appending into `to`'s free
    /// space, or spilling into a freshly allocated partial block.
    fn move_misplaced(&self, states: &mut [PartState; 3], to: usize, from: usize) {
        let to_has_space = !states[to].partial
            && states[to].blk.is_some()
            && states[to].pos < self.ctx.block_size;

        if to_has_space {
            if states[to].pos < states[to].fill() {
                {
                    let (t, f) = two_mut(states, to, from);
                    swap_fronts(t, f);
                }
                states[to].pos += 1;
            } else {
                let rec = states[from].take_front();
                states[to].push_classified(rec);
            }
        } else {
            self.check_partial_block(states, to);
            let rec = states[from].take_front();
            states[to].push_classified(rec);
        }
    }

    /// Classifies whatever is left in `side`'s kept block after the source
    /// drained, moving strays to their proper side.
    fn finish_partial(&self, states: &mut [PartState; 3], side: usize) {
        if states[side].blk.is_none() || states[side].partial {
            return;
        }
        while states[side].pos < states[side].fill() {
            let k = states[side].front_key();
            let target = if k < self.pivot {
                LT
            } else if k == self.pivot {
                EQ
            } else {
                GT
            };
            if target == side {
                states[side].pos += 1;
            } else {
                self.move_misplaced(states, target, side);
            }
        }
    }

    fn partition(&self, queue: &JobQueue) {
        let pivot = self.pivot;
        let mut states = [PartState::new(), PartState::new(), PartState::new()];

        // phase 1: stream blocks, swapping records between the three heads
        'outer: loop {
            // lt head advances until a greater-than record surfaces
            loop {
                if !self.has_src_block(&mut states, LT) || !self.has_src_block(&mut states, EQ) {
                    break 'outer;
                }
                let k = states[LT].front_key();
                if k < pivot {
                    states[LT].pos += 1;
                } else if k == pivot {
                    {
                        let (lt, eq) = two_mut(&mut states, LT, EQ);
                        swap_fronts(lt, eq);
                    }
                    states[EQ].pos += 1;
                } else {
                    break;
                }
            }
            // gt head advances until a less-than record surfaces
            loop {
                if !self.has_src_block(&mut states, GT) || !self.has_src_block(&mut states, EQ) {
                    break 'outer;
                }
                let k = states[GT].front_key();
                if k > pivot {
                    states[GT].pos += 1;
                } else if k == pivot {
                    {
                        let (gt, eq) = two_mut(&mut states, GT, EQ);
                        swap_fronts(gt, eq);
                    }
                    states[EQ].pos += 1;
                } else {
                    break;
                }
            }
            // both heads sit on the wrong side: cross-swap
            debug_assert!(states[LT].front_key() > pivot && states[GT].front_key() < pivot);
            {
                let (lt, gt) = two_mut(&mut states, LT, GT);
                swap_fronts(lt, gt);
            }
            states[LT].pos += 1;
            states[GT].pos += 1;
        }

        // phase 2: redistribute the leftovers record by record
        for st in states.iter_mut() {
            st.partial = st.blk.is_none();
        }
        for side in [LT, EQ, GT] {
            self.finish_partial(&mut states, side);
        }
        for side in [LT, EQ, GT] {
            if let Some(blk) = states[side].blk.take() {
                if blk.fill() > 0 {
                    self.oblk_push(side, blk);
                }
            }
        }

        if self.pwork.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.partition_finished(queue);
        }
    }

    /// Recursion phase, run exactly once per step by the last worker.
    fn partition_finished(&self, queue: &JobQueue) {
        let strset = self.blks.strset();
        let depth = self.depth();
        let n = strset.size();
        let count_lt = self.count_lt.load(Ordering::SeqCst);
        let count_eq = self.count_eq.load(Ordering::SeqCst);
        debug_assert!(count_lt + count_eq <= n);
        let count_gt = n - count_lt - count_eq;

        let threshold = self.ctx.sequential_threshold;

        if count_lt > 0 {
            if count_lt <= threshold {
                queue.enqueue(Box::new(SequentialJob::<false> {
                    ctx: Arc::clone(&self.ctx),
                    strset: strset.subrange(0, count_lt),
                    depth,
                    input: SeqInput::Blocks(Arc::clone(&self.oblk_lt)),
                }));
            } else {
                enqueue_parallel(
                    Arc::clone(&self.ctx),
                    queue,
                    QueueBlockSource::<false>::new(
                        strset.subrange(0, count_lt),
                        depth,
                        Arc::clone(&self.oblk_lt),
                        Arc::clone(&self.opiv_lt),
                    ),
                );
            }
        }

        if count_eq > 0 {
            let sub = strset.subrange(count_lt, count_eq);
            if self.pivot & 0xFF == 0 {
                // terminator inside the pivot window: every record in the
                // equal bucket is a fully equal string, copy them back
                let mut o = 0;
                while let Some(blk) = self.oblk_eq.pop() {
                    for rec in &blk.cache {
                        sub.set(o, rec.str);
                        o += 1;
                    }
                }
                debug_assert_eq!(o, count_eq);
            } else if count_eq <= threshold {
                queue.enqueue(Box::new(SequentialJob::<true> {
                    ctx: Arc::clone(&self.ctx),
                    strset: sub,
                    depth: depth + KEY_LEN,
                    input: SeqInput::Blocks(Arc::clone(&self.oblk_eq)),
                }));
            } else {
                enqueue_parallel(
                    Arc::clone(&self.ctx),
                    queue,
                    QueueBlockSource::<true>::new(
                        sub,
                        depth + KEY_LEN,
                        Arc::clone(&self.oblk_eq),
                        Arc::clone(&self.opiv_eq),
                    ),
                );
            }
        }

        if count_gt > 0 {
            let sub = strset.subrange(count_lt + count_eq, count_gt);
            if count_gt <= threshold {
                queue.enqueue(Box::new(SequentialJob::<false> {
                    ctx: Arc::clone(&self.ctx),
                    strset: sub,
                    depth,
                    input: SeqInput::Blocks(Arc::clone(&self.oblk_gt)),
                }));
            } else {
                enqueue_parallel(
                    Arc::clone(&self.ctx),
                    queue,
                    QueueBlockSource::<false>::new(
                        sub,
                        depth,
                        Arc::clone(&self.oblk_gt),
                        Arc::clone(&self.opiv_gt),
                    ),
                );
            }
        }
    }
}
