//! Super-scalar sample sort: splitter selection, the implicit splitter
//! tree, branch-free classification, and the sequential recursion.
//!
//! The classifier partitions a subset into `2S + 1` buckets in one pass:
//! even bucket `2k` holds keys strictly between splitters `k-1` and `k`,
//! odd bucket `2k + 1` holds keys equal to splitter `k`. Less-than buckets
//! recurse with the common prefix of their bounding splitters added to the
//! depth; equal buckets recurse a full key deeper, unless the splitter
//! carries the terminator in which case the bucket is already sorted.

use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use crate::driver::Context;
use crate::radix::msd_radix_sort;
use crate::string_set::{Key, StringSet, KEY_LEN};

/// Sorted splitters in implicit binary-tree (heap) order plus the
/// per-boundary common-prefix lengths used to advance the depth.
pub(crate) struct SplitterTree {
    /// Heap-ordered keys, 1-based: the root lives at index 1 and the
    /// traversal step is `i = 2i + (key > tree[i])`.
    tree: Vec<Key>,
    /// The same keys in sorted order, for the equality promotion.
    splitter: Vec<Key>,
    /// `lcp[i]` = common prefix bytes of splitter `i-1` and splitter `i`,
    /// with zero sentinels at both ends for the outermost buckets.
    lcp: Vec<u8>,
    num: usize,
}

impl SplitterTree {
    /// The largest splitter count of the form `2^t - 1` whose tree plus
    /// bucket bookkeeping fits the cache budget. Also bounded so that all
    /// `2S + 1` bucket ids fit in a `u16`.
    pub(crate) fn leaves_for(l2_cache: usize) -> usize {
        let word = std::mem::size_of::<usize>();
        let fits = |num: usize| num * KEY_LEN + (2 * num + 1) * 2 * word <= l2_cache;
        let mut t = 1;
        while fits((1 << (t + 1)) - 1) && (1 << (t + 1)) - 1 <= u16::MAX as usize / 2 {
            t += 1;
        }
        (1 << t) - 1
    }

    /// Builds the tree from an oversampled, already gathered key sample.
    /// `samples.len()` must be `num * oversample`.
    pub(crate) fn build(samples: &mut [Key], num: usize, oversample: usize) -> SplitterTree {
        debug_assert!((num + 1).is_power_of_two());
        debug_assert_eq!(samples.len(), num * oversample);
        samples.sort_unstable();

        let mut splitter = Vec::with_capacity(num);
        let mut lcp = vec![0u8; num + 1];
        let mut j = oversample / 2;
        for i in 0..num {
            splitter.push(samples[j]);
            if i != 0 {
                let xor = splitter[i - 1] ^ splitter[i];
                lcp[i] = (xor.leading_zeros() / 8) as u8;
            }
            j += oversample;
        }

        // heap layout: repeatedly halve the highest bit, emitting each
        // level's splitters left to right
        let mut tree = vec![0 as Key; num + 1];
        let mut t = 1;
        let mut highbit = (num + 1) / 2;
        while highbit > 0 {
            let mut p = highbit - 1;
            let inc = highbit << 1;
            while p < num {
                tree[t] = splitter[p];
                t += 1;
                p += inc;
            }
            highbit >>= 1;
        }

        SplitterTree {
            tree,
            splitter,
            lcp,
            num,
        }
    }

    #[inline]
    pub(crate) fn num_splitters(&self) -> usize {
        self.num
    }

    #[inline]
    pub(crate) fn bktnum(&self) -> usize {
        2 * self.num + 1
    }

    #[inline]
    pub(crate) fn splitter(&self, i: usize) -> Key {
        self.splitter[i]
    }

    /// Depth advance when recursing into the less-than bucket left of
    /// splitter `i` (or right of the last one, for `i == num`).
    #[inline]
    pub(crate) fn lcp(&self, i: usize) -> usize {
        usize::from(self.lcp[i])
    }

    /// Classifies a key into its bucket id. The tree descent compiles to a
    /// compare plus arithmetic per level, with no data-dependent branch.
    #[inline]
    pub(crate) fn classify(&self, key: Key) -> u16 {
        let mut i = 1;
        while i <= self.num {
            i = 2 * i + usize::from(key > self.tree[i]);
        }
        let leaf = i - (self.num + 1);
        let mut b = leaf * 2;
        if leaf < self.num && self.splitter[leaf] == key {
            b += 1;
        }
        b as u16
    }
}

/// Deterministic per-subproblem sample stream: the configured seed mixed
/// with the subproblem shape, so results do not depend on scheduling.
pub(crate) fn sample_rng(seed: u64, n: usize, depth: usize) -> XorShiftRng {
    let mixed = seed
        ^ (n as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (depth as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
    XorShiftRng::seed_from_u64(mixed)
}

pub(crate) fn gather_samples(
    ctx: &Context,
    ss: StringSet,
    depth: usize,
    num: usize,
) -> Vec<Key> {
    let n = ss.size();
    let mut rng = sample_rng(ctx.seed, n, depth);
    let samplesize = ctx.oversample * num;
    (0..samplesize)
        .map(|_| ss.get_u64(ss.at(rng.gen_range(0..n)), depth))
        .collect()
}

/// Sequential sample sort of one subset. Small subsets fall through to MSD
/// radix sort; everything else is classified, permuted in place and
/// recursed bucket by bucket.
pub(crate) fn sample_sort(ctx: &Context, ss: StringSet, depth: usize) {
    let n = ss.size();
    if n < ctx.smallsort_threshold {
        return msd_radix_sort(ss, depth, ctx.inssort_threshold);
    }

    let num = SplitterTree::leaves_for(ctx.l2_cache);
    let mut samples = gather_samples(ctx, ss, depth, num);
    let tree = SplitterTree::build(&mut samples, num, ctx.oversample);
    let bktnum = tree.bktnum();

    // classify every string once, caching its bucket id
    let mut bktcache = vec![0u16; n];
    for (i, slot) in bktcache.iter_mut().enumerate() {
        *slot = tree.classify(ss.get_u64(ss.at(i), depth));
    }

    let mut bktsize = vec![0usize; bktnum];
    for &b in &bktcache {
        bktsize[b as usize] += 1;
    }

    // running end positions per bucket
    let mut bktindex = vec![0usize; bktnum];
    bktindex[0] = bktsize[0];
    let mut last_bkt_size = bktsize[0];
    for b in 1..bktnum {
        bktindex[b] = bktindex[b - 1] + bktsize[b];
        if bktsize[b] != 0 {
            last_bkt_size = bktsize[b];
        }
    }
    debug_assert_eq!(bktindex[bktnum - 1], n);

    // in-place permutation, carrying each string's bucket id through the
    // displacement cycle
    let mut i = 0;
    while i < n - last_bkt_size {
        let mut perm = ss.at(i);
        let mut permbkt = bktcache[i];
        loop {
            bktindex[permbkt as usize] -= 1;
            let j = bktindex[permbkt as usize];
            if j <= i {
                break;
            }
            let s = ss.at(j);
            ss.set(j, perm);
            perm = s;
            std::mem::swap(&mut permbkt, &mut bktcache[j]);
        }
        ss.set(i, perm);
        i += bktsize[permbkt as usize];
    }
    drop(bktcache);

    // recursion
    let mut i = 0;
    let mut bsum = 0;
    while i < bktnum - 1 {
        // even index: less-than bucket
        if bktsize[i] > 1 {
            sample_sort(ctx, ss.subrange(bsum, bktsize[i]), depth + tree.lcp(i / 2));
        }
        bsum += bktsize[i];
        i += 1;

        // odd index: equal bucket
        if bktsize[i] > 1 {
            if tree.splitter(i / 2) & 0xFF == 0 {
                // terminator inside the splitter window: bucket is sorted
            } else {
                sample_sort(ctx, ss.subrange(bsum, bktsize[i]), depth + KEY_LEN);
            }
        }
        bsum += bktsize[i];
        i += 1;
    }
    if bktsize[i] > 0 {
        sample_sort(ctx, ss.subrange(bsum, bktsize[i]), depth);
    }
    bsum += bktsize[i];
    debug_assert_eq!(bsum, n);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string_set::{StringHeap, StringRef};

    #[test]
    fn leaves_fit_budget_and_u16_buckets() {
        for l2 in [16 * 1024, 128 * 1024, 256 * 1024, 8 * 1024 * 1024] {
            let num = SplitterTree::leaves_for(l2);
            assert!((num + 1).is_power_of_two());
            assert!(2 * num + 1 <= u16::MAX as usize);
        }
    }

    #[test]
    fn tree_layout_matches_sorted_order() {
        // splitters 0..=6, tree of height 3: root must be the median
        let num = 7;
        let mut samples: Vec<Key> = (0..num as Key).collect();
        let tree = SplitterTree::build(&mut samples, num, 1);
        assert_eq!(tree.tree[1], 3);
        assert_eq!(&tree.tree[2..4], &[1, 5]);
        assert_eq!(&tree.tree[4..8], &[0, 2, 4, 6]);
    }

    #[test]
    fn classify_agrees_with_binary_search() {
        let num = 15;
        let mut samples: Vec<Key> = (0..num as u64).map(|i| i * 10 + 5).collect();
        let tree = SplitterTree::build(&mut samples, num, 1);

        let reference = |key: Key| -> u16 {
            let mut lo = 0;
            while lo < num && tree.splitter(lo) < key {
                lo += 1;
            }
            let mut b = (lo * 2) as u16;
            if lo < num && tree.splitter(lo) == key {
                b += 1;
            }
            b
        };

        for key in 0..200u64 {
            assert_eq!(tree.classify(key), reference(key), "key {}", key);
        }
        assert_eq!(tree.classify(u64::MAX), (2 * num) as u16);
    }

    #[test]
    fn lcp_counts_leading_common_bytes() {
        let num = 3;
        let mut samples = vec![
            0x6161_6161_0000_0000u64,
            0x6161_6162_0000_0000,
            0x6262_0000_0000_0000,
        ];
        let tree = SplitterTree::build(&mut samples, num, 1);
        assert_eq!(tree.lcp(0), 0);
        assert_eq!(tree.lcp(1), 3);
        assert_eq!(tree.lcp(2), 0);
    }

    #[test]
    fn deterministic_rng_streams() {
        let mut a = sample_rng(7, 1000, 8);
        let mut b = sample_rng(7, 1000, 8);
        for _ in 0..16 {
            assert_eq!(a.gen::<u64>(), b.gen::<u64>());
        }
    }

    #[test]
    fn sequential_sample_sort_sorts() {
        let ctx = Context::for_tests();
        let mut heap = StringHeap::new();
        let mut expected: Vec<Vec<u8>> = Vec::new();
        let mut strings: Vec<StringRef> = Vec::new();
        // enough strings to get past the radix fallback with the test
        // context's tiny smallsort threshold
        for i in 0..4000u32 {
            let s = format!("key{:05}", (i.wrapping_mul(2654435761u32)) >> 16).into_bytes();
            expected.push(s.clone());
            strings.push(heap.add(&s));
        }
        expected.sort();
        sample_sort(&ctx, StringSet::new(&mut strings), 0);
        for (s, e) in strings.iter().zip(&expected) {
            for (k, &byte) in e.iter().enumerate() {
                assert_eq!(s.byte_at(k), byte);
            }
            assert_eq!(s.byte_at(e.len()), 0);
        }
    }
}
