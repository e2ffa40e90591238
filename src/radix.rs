//! MSD radix sort, the smallsort fallback of the sample sorter.
//!
//! One counting pass over the byte at the current depth, an in-place cycle
//! permutation into bucket order, then recursion per bucket one byte deeper.
//! The terminator bucket needs no recursion: its strings are fully equal up
//! to their ends.

use crate::insertion::insertion_sort_strings;
use crate::string_set::StringSet;

const RADIX: usize = 256;

pub(crate) fn msd_radix_sort(ss: StringSet, depth: usize, insertion_threshold: usize) {
    let n = ss.size();
    if n <= 1 {
        return;
    }
    if n < insertion_threshold {
        return insertion_sort_strings(ss, depth);
    }

    // bucket sizes for the byte at `depth`
    let mut bktsize = [0usize; RADIX];
    for i in 0..n {
        bktsize[ss.at(i).byte_at(depth) as usize] += 1;
    }

    // running end positions; the final bucket's cycle closes itself
    let mut bktindex = [0usize; RADIX];
    bktindex[0] = bktsize[0];
    let mut last_bkt_size = bktsize[0];
    for b in 1..RADIX {
        bktindex[b] = bktindex[b - 1] + bktsize[b];
        if bktsize[b] != 0 {
            last_bkt_size = bktsize[b];
        }
    }

    // permute in place, following displacement cycles
    let mut i = 0;
    while i < n - last_bkt_size {
        let mut perm = ss.at(i);
        let b = loop {
            let b = perm.byte_at(depth) as usize;
            bktindex[b] -= 1;
            let j = bktindex[b];
            if j <= i {
                break b;
            }
            let evicted = ss.at(j);
            ss.set(j, perm);
            perm = evicted;
        };
        ss.set(i, perm);
        i += bktsize[b];
    }

    // recursion; bucket 0 holds fully terminated (equal) strings
    let mut bsum = bktsize[0];
    for b in 1..RADIX {
        if bktsize[b] > 1 {
            msd_radix_sort(ss.subrange(bsum, bktsize[b]), depth + 1, insertion_threshold);
        }
        bsum += bktsize[b];
    }
}
