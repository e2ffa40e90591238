//! Code that decides when workers should go to sleep, and that lets running
//! jobs ask whether anyone is asleep (the work-sharing hint).

use crate::log::Event::*;
use crate::registry::Registry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;

/// How many failed search rounds a worker yields before parking itself.
const ROUNDS_UNTIL_ASLEEP: usize = 64;

pub(super) struct Sleep {
    /// Number of workers currently parked (or about to park). This is the
    /// source of the `has_idle` hint and of the tickle fast path, so it is
    /// maintained with seq-cst operations: a worker advertises itself here
    /// *before* its final check of the queues, and a producer enqueues
    /// *before* loading it. One of the two must observe the other.
    idle_count: AtomicUsize,

    /// Tickle epoch. Bumped under the lock on every wake-up, so a worker
    /// that reads the epoch and then finds no work can park until the epoch
    /// moves, without missing a tickle sent in between.
    epoch: Mutex<usize>,
    tickle: Condvar,
}

impl Sleep {
    pub(super) fn new() -> Sleep {
        Sleep {
            idle_count: AtomicUsize::new(0),
            epoch: Mutex::new(0),
            tickle: Condvar::new(),
        }
    }

    /// Cheap hint: is at least one worker parked right now? Running jobs
    /// use this to decide whether to donate pending work to the queue.
    #[inline]
    pub(super) fn has_idle(&self) -> bool {
        self.idle_count.load(Ordering::Relaxed) > 0
    }

    /// Invoked by a worker that failed to find work `yields` times in a
    /// row. Yields the timeslice for a while, then parks. Returns the new
    /// round count.
    #[inline]
    pub(super) fn no_work_found(
        &self,
        registry: &Registry,
        worker_index: usize,
        yields: usize,
    ) -> usize {
        if yields < ROUNDS_UNTIL_ASLEEP {
            thread::yield_now();
            yields + 1
        } else {
            self.sleep(registry, worker_index);
            0
        }
    }

    fn sleep(&self, registry: &Registry, worker_index: usize) {
        // Advertise idleness first: any tickle issued after this point will
        // take the slow path and bump the epoch.
        self.idle_count.fetch_add(1, Ordering::SeqCst);

        let mut epoch = self.epoch.lock().unwrap();

        // Final check with idleness advertised. A producer that enqueued
        // before our fetch_add may have skipped its tickle, but then its job
        // is already visible to this probe.
        if registry.has_pending_jobs() || registry.terminate_probe() {
            drop(epoch);
            self.idle_count.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        log!(FellAsleep {
            worker: worker_index
        });

        let entry = *epoch;
        while *epoch == entry {
            epoch = self.tickle.wait(epoch).unwrap();
        }
        drop(epoch);

        self.idle_count.fetch_sub(1, Ordering::SeqCst);

        log!(GotAwoken {
            worker: worker_index
        });
    }

    /// Called after enqueueing a job. The seq-cst load pairs with the
    /// seq-cst increment in `sleep`; if nobody is parked or about to park,
    /// this is a single atomic load.
    #[inline]
    pub(super) fn tickle(&self) {
        let idle = self.idle_count.load(Ordering::SeqCst);
        if idle != 0 {
            self.tickle_cold(idle);
        }
    }

    #[cold]
    fn tickle_cold(&self, idle: usize) {
        log!(Tickle { idle });
        let mut epoch = self.epoch.lock().unwrap();
        *epoch += 1;
        self.tickle.notify_all();
    }

    /// Wakes every parked worker unconditionally; used on termination.
    pub(super) fn tickle_all(&self) {
        let mut epoch = self.epoch.lock().unwrap();
        *epoch += 1;
        self.tickle.notify_all();
    }
}
