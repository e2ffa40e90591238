//! Cache records, fixed-capacity blocks of them, and the shared buffers the
//! parallel steps exchange.

use crossbeam_queue::SegQueue;
use std::cell::UnsafeCell;
use std::fmt;
use std::slice;

use crate::string_set::{Key, StringRef};

/// A string reference paired with its cached key window.
///
/// While a record is in transit its key is either *clean* (the window at the
/// current depth) or *dirty* (possibly from a shallower depth, to be
/// recomputed before use). Which of the two holds is a property of the
/// enclosing job, not of the record.
#[derive(Copy, Clone, Debug)]
pub(crate) struct StrCache {
    pub(crate) key: Key,
    pub(crate) str: StringRef,
}

impl StrCache {
    pub(crate) fn placeholder() -> StrCache {
        StrCache {
            key: 0,
            str: StringRef::null(),
        }
    }
}

/// A fixed-capacity batch of cache records, the unit of transfer between
/// partition workers. `fill` is the vector length; capacity is the
/// configured block size. A block is exclusively owned by either one
/// partitioner or one queue.
pub(crate) struct CacheBlock {
    pub(crate) cache: Vec<StrCache>,
}

impl CacheBlock {
    pub(crate) fn with_capacity(capacity: usize) -> Box<CacheBlock> {
        Box::new(CacheBlock {
            cache: Vec::with_capacity(capacity),
        })
    }

    #[inline]
    pub(crate) fn fill(&self) -> usize {
        self.cache.len()
    }

    #[inline]
    pub(crate) fn key(&self, i: usize) -> Key {
        self.cache[i].key
    }

    #[inline]
    pub(crate) fn string(&self, i: usize) -> StringRef {
        self.cache[i].str
    }
}

impl fmt::Debug for CacheBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBlock")
            .field("fill", &self.fill())
            .field("capacity", &self.cache.capacity())
            .finish()
    }
}

/// Lock-free multi-producer/multi-consumer queue of blocks. Shared between
/// the partition workers that fill it and the recursive job that drains it;
/// the last `Arc` holder frees it.
pub(crate) type BlockQueue = SegQueue<Box<CacheBlock>>;

/// Side channel carrying one mid-block key sample per published block, from
/// which the next recursion level picks its pivot.
pub(crate) type PivotQueue = SegQueue<Key>;

/// A heap buffer shared between jobs that are guaranteed to touch disjoint
/// element ranges.
///
/// This is the reference-counted cache buffer of the sequential sorter after
/// a work-sharing hand-off, and the bucket/cache/output arrays of the
/// parallel sample sorter. Rust's aliasing rules forbid handing out one big
/// `&mut` to several threads, so access goes through short-lived raw-pointer
/// views instead.
///
/// # Safety contract
///
/// Callers of `slice_mut`, `read` and `write` must ensure that concurrently
/// accessed element ranges are disjoint. The partitioning algorithms provide
/// exactly this guarantee.
pub(crate) struct SharedVec<T> {
    buf: UnsafeCell<Box<[T]>>,
}

unsafe impl<T: Send> Send for SharedVec<T> {}
unsafe impl<T: Send> Sync for SharedVec<T> {}

impl<T: Copy> SharedVec<T> {
    pub(crate) fn new(len: usize, init: T) -> SharedVec<T> {
        SharedVec {
            buf: UnsafeCell::new(vec![init; len].into_boxed_slice()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        unsafe { (&*self.buf.get()).len() }
    }

    /// An exclusive view of `len` elements starting at `offset`.
    ///
    /// # Safety
    ///
    /// No other view or element access may overlap the range while the
    /// returned slice is alive.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slice_mut(&self, offset: usize, len: usize) -> &mut [T] {
        let buf = &mut *self.buf.get();
        assert!(offset <= buf.len() && len <= buf.len() - offset);
        slice::from_raw_parts_mut(buf.as_mut_ptr().add(offset), len)
    }

    /// Reads one element without materialising a reference.
    ///
    /// # Safety
    ///
    /// No concurrent write to index `i`.
    #[inline]
    pub(crate) unsafe fn read(&self, i: usize) -> T {
        let buf = &*self.buf.get();
        assert!(i < buf.len());
        buf.as_ptr().add(i).read()
    }

    /// Writes one element without materialising a reference.
    ///
    /// # Safety
    ///
    /// No concurrent access to index `i`.
    #[inline]
    pub(crate) unsafe fn write(&self, i: usize, value: T) {
        let buf = &mut *self.buf.get();
        assert!(i < buf.len());
        buf.as_mut_ptr().add(i).write(value)
    }
}

impl<T> fmt::Debug for SharedVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedVec").finish()
    }
}

/// The sequential sorter's record buffer. Jobs spawned by a work-sharing
/// hand-off keep the arena alive through their `Arc` handle; the last one to
/// finish frees it.
pub(crate) type CacheArena = SharedVec<StrCache>;

impl CacheArena {
    pub(crate) fn for_records(len: usize) -> CacheArena {
        SharedVec::new(len, StrCache::placeholder())
    }
}
