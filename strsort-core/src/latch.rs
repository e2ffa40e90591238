use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

/// A latch starts as false and eventually becomes true; `set()` is called
/// once, `probe()` any number of times. Once `probe()` returns true, the
/// memory effects that preceded the `set()` are visible.

/// Latch is not set.
const UNSET: usize = 0;

/// Latch is set.
const SET: usize = 1;

/// The simplest, cheapest latch: an atomic flag that can only be probed,
/// not waited on. Used for the terminate signal, which workers poll on
/// every loop iteration anyway.
#[derive(Debug)]
pub(super) struct CoreLatch {
    state: AtomicUsize,
}

impl CoreLatch {
    #[inline]
    pub(super) fn new() -> CoreLatch {
        CoreLatch {
            state: AtomicUsize::new(UNSET),
        }
    }

    /// Set the latch, signalling others.
    #[inline]
    pub(super) fn set(&self) {
        self.state.store(SET, Ordering::SeqCst);
    }

    /// Test if the latch has been set.
    #[inline]
    pub(super) fn probe(&self) -> bool {
        self.state.load(Ordering::Acquire) == SET
    }
}

/// A latch that can be waited on, blocking efficiently. Used by the thread
/// driving the queue to wait for quiescence.
#[derive(Debug)]
pub(super) struct LockLatch {
    m: Mutex<bool>,
    v: Condvar,
}

impl LockLatch {
    #[inline]
    pub(super) fn new() -> LockLatch {
        LockLatch {
            m: Mutex::new(false),
            v: Condvar::new(),
        }
    }

    pub(super) fn set(&self) {
        let mut guard = self.m.lock().unwrap();
        *guard = true;
        self.v.notify_all();
    }

    /// Block until the latch is set.
    pub(super) fn wait(&self) {
        let mut guard = self.m.lock().unwrap();
        while !*guard {
            guard = self.v.wait(guard).unwrap();
        }
    }
}
