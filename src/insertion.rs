//! Leaf sorters: insertion sort over cache records (key-only and
//! full-string) and over bare string references.

use std::cmp::Ordering;

use crate::cache::StrCache;
use crate::string_set::{compare_from, StringSet, KEY_LEN};

/// Insertion sort comparing the underlying bytes from `depth`, ignoring any
/// cached keys.
pub(crate) fn insertion_sort_nocache(cache: &mut [StrCache], depth: usize) {
    for i in 1..cache.len() {
        let tmp = cache[i];
        let mut j = i;
        while j > 0 && compare_from(cache[j - 1].str, tmp.str, depth) == Ordering::Greater {
            cache[j] = cache[j - 1];
            j -= 1;
        }
        cache[j] = tmp;
    }
}

/// Insertion sort on the cached keys alone. String references move with
/// their keys.
pub(crate) fn insertion_sort_cache_block(cache: &mut [StrCache]) {
    for i in 1..cache.len() {
        let tmp = cache[i];
        let mut j = i;
        while j > 0 && cache[j - 1].key > tmp.key {
            cache[j] = cache[j - 1];
            j -= 1;
        }
        cache[j] = tmp;
    }
}

/// Hybrid leaf sorter. With a dirty cache the keys are unusable and the
/// records are sorted by their full strings. With a clean cache the keys are
/// sorted first; maximal runs of equal keys whose low byte is non-zero (no
/// terminator inside the window) are then resolved eight bytes deeper.
pub(crate) fn insertion_sort(cache: &mut [StrCache], depth: usize, cache_dirty: bool) {
    let n = cache.len();
    if n == 0 {
        return;
    }
    if cache_dirty {
        return insertion_sort_nocache(cache, depth);
    }

    insertion_sort_cache_block(cache);

    let mut start = 0;
    let mut cnt = 1;
    for i in 0..n - 1 {
        if cache[i].key == cache[i + 1].key {
            cnt += 1;
            continue;
        }
        if cnt > 1 && cache[start].key & 0xFF != 0 {
            insertion_sort_nocache(&mut cache[start..start + cnt], depth + KEY_LEN);
        }
        cnt = 1;
        start = i + 1;
    }
    if cnt > 1 && cache[start].key & 0xFF != 0 {
        insertion_sort_nocache(&mut cache[start..start + cnt], depth + KEY_LEN);
    }
}

/// Insertion sort directly on a range of string references, used by the
/// radix smallsort for tiny subproblems.
pub(crate) fn insertion_sort_strings(ss: StringSet, depth: usize) {
    for i in 1..ss.size() {
        let tmp = ss.at(i);
        let mut j = i;
        while j > 0 && compare_from(ss.at(j - 1), tmp, depth) == Ordering::Greater {
            ss.set(j, ss.at(j - 1));
            j -= 1;
        }
        ss.set(j, tmp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string_set::{StringHeap, StringRef};

    fn records(heap: &mut StringHeap, strs: &[&[u8]], depth: usize) -> Vec<StrCache> {
        strs.iter()
            .map(|s| {
                let r = heap.add(s);
                StrCache {
                    key: r.key_at(depth),
                    str: r,
                }
            })
            .collect()
    }

    fn contents(cache: &[StrCache]) -> Vec<Vec<u8>> {
        cache
            .iter()
            .map(|c| {
                let mut out = Vec::new();
                let mut i = 0;
                loop {
                    let b = c.str.byte_at(i);
                    if b == 0 {
                        break;
                    }
                    out.push(b);
                    i += 1;
                }
                out
            })
            .collect()
    }

    #[test]
    fn key_only_orders_by_key() {
        let mut heap = StringHeap::new();
        let mut cache = records(&mut heap, &[b"c", b"a", b"b"], 0);
        insertion_sort_cache_block(&mut cache);
        assert_eq!(contents(&cache), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn nocache_ignores_stale_keys() {
        let mut heap = StringHeap::new();
        let mut cache = records(&mut heap, &[b"zb", b"za", b"zc"], 0);
        // poison the keys; the full-string variant must not look at them
        for c in cache.iter_mut() {
            c.key = 0;
        }
        insertion_sort_nocache(&mut cache, 0);
        assert_eq!(
            contents(&cache),
            vec![b"za".to_vec(), b"zb".to_vec(), b"zc".to_vec()]
        );
    }

    #[test]
    fn hybrid_descends_into_equal_key_runs() {
        let mut heap = StringHeap::new();
        // identical first eight bytes, decided at depth 8
        let mut cache = records(
            &mut heap,
            &[b"prefix__y", b"prefix__x", b"prefix__a", b"b"],
            0,
        );
        insertion_sort(&mut cache, 0, false);
        assert_eq!(
            contents(&cache),
            vec![
                b"b".to_vec(),
                b"prefix__a".to_vec(),
                b"prefix__x".to_vec(),
                b"prefix__y".to_vec(),
            ]
        );
    }

    #[test]
    fn hybrid_leaves_terminated_runs_alone() {
        let mut heap = StringHeap::new();
        // equal keys with an embedded terminator: strings are fully equal,
        // no deeper pass needed or possible
        let mut cache = records(&mut heap, &[b"abc", b"abc", b"abc"], 0);
        insertion_sort(&mut cache, 0, false);
        assert_eq!(contents(&cache).len(), 3);
    }

    #[test]
    fn string_insertion_sorts_in_place() {
        let mut heap = StringHeap::new();
        let inputs: [&[u8]; 5] = [b"b", b"a", b"", b"ab", b"aa"];
        let mut strings: Vec<StringRef> = inputs.iter().map(|s| heap.add(s)).collect();
        let ss = StringSet::new(&mut strings);
        insertion_sort_strings(ss, 0);
        let got: Vec<Vec<u8>> = contents(
            &strings
                .iter()
                .map(|s| StrCache { key: 0, str: *s })
                .collect::<Vec<_>>(),
        );
        assert_eq!(
            got,
            vec![
                b"".to_vec(),
                b"a".to_vec(),
                b"aa".to_vec(),
                b"ab".to_vec(),
                b"b".to_vec()
            ]
        );
    }
}
