use crossbeam_deque::{Steal, Stealer, Worker};
use crossbeam_queue::SegQueue;
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::job::Job;
use crate::latch::{CoreLatch, LockLatch};
use crate::log::Event::*;
use crate::sleep::Sleep;
use crate::unwind;
use crate::{ErrorKind, JobQueueBuildError, JobQueueBuilder};

/// Handle to a running job queue.
///
/// A `JobQueue` reference is passed to the seed closure of
/// [`JobQueueBuilder::run`] and to every executing [`Job`]; it is the only
/// way to submit further work.
///
/// [`JobQueueBuilder::run`]: struct.JobQueueBuilder.html#method.run
/// [`Job`]: trait.Job.html
pub struct JobQueue {
    registry: Arc<Registry>,
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("num_threads", &self.num_threads())
            .finish()
    }
}

impl JobQueue {
    /// Inserts a job. Non-blocking; the job becomes visible to the worker
    /// threads with a happens-before edge carrying all writes made so far.
    ///
    /// When called from inside a running job this pushes onto the worker's
    /// own deque (idle workers steal from there); from outside it goes to
    /// the shared injector.
    pub fn enqueue(&self, job: Box<dyn Job>) {
        // Count before publishing: quiescence must not be declared while
        // this job is in flight.
        self.registry.active_jobs.fetch_add(1, Ordering::SeqCst);

        let worker_thread = WorkerThread::current();
        unsafe {
            if !worker_thread.is_null()
                && Arc::as_ptr(&(*worker_thread).registry) == Arc::as_ptr(&self.registry)
            {
                log!(EnqueuedLocal {
                    worker: (*worker_thread).index
                });
                (*worker_thread).worker.push(job);
            } else {
                log!(EnqueuedInjected);
                self.registry.injector.push(job);
            }
        }

        self.registry.sleep.tickle();
    }

    /// Returns true when at least one worker thread is waiting for work.
    ///
    /// This is a cheap, racy hint. Running jobs use it to decide whether to
    /// convert pending private work into independent jobs (work-sharing).
    #[inline]
    pub fn has_idle(&self) -> bool {
        self.registry.sleep.has_idle()
    }

    /// The number of worker threads serving this queue.
    #[inline]
    pub fn num_threads(&self) -> usize {
        self.registry.stealers.len()
    }
}

pub(super) struct Registry {
    stealers: Vec<Stealer<Box<dyn Job>>>,
    injector: SegQueue<Box<dyn Job>>,
    sleep: Sleep,

    /// Jobs enqueued but not yet fully executed. When this reaches zero the
    /// transitive closure of jobs is exhausted: jobs only ever enqueue
    /// children while they are themselves counted here.
    active_jobs: AtomicUsize,

    terminate: CoreLatch,
    quiescent: LockLatch,

    /// First panic payload observed in a job, resumed on the driving thread.
    panic: Mutex<Option<Box<dyn Any + Send>>>,
}

impl Registry {
    pub(super) fn has_pending_jobs(&self) -> bool {
        !self.injector.is_empty() || self.stealers.iter().any(|s| !s.is_empty())
    }

    pub(super) fn terminate_probe(&self) -> bool {
        self.terminate.probe()
    }

    fn execute(&self, job: Box<dyn Job>, queue: &JobQueue, worker_index: usize) {
        match unwind::halt_unwinding(|| job.run(queue)) {
            Ok(()) => {}
            Err(payload) => {
                log!(JobPanicked {
                    worker: worker_index
                });
                // A panicking job must not wedge the queue: record the
                // payload, stop scheduling, and release the driving thread.
                let abort_guard = unwind::AbortIfPanic;
                {
                    let mut panic = self.panic.lock().unwrap();
                    if panic.is_none() {
                        *panic = Some(payload);
                    }
                }
                self.terminate.set();
                self.quiescent.set();
                self.sleep.tickle_all();
                mem::forget(abort_guard);
            }
        }

        if self.active_jobs.fetch_sub(1, Ordering::SeqCst) == 1 {
            log!(Quiescent);
            self.quiescent.set();
            self.sleep.tickle_all();
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("num_threads", &self.stealers.len())
            .field("active_jobs", &self.active_jobs.load(Ordering::Relaxed))
            .finish()
    }
}

struct WorkerThread {
    worker: Worker<Box<dyn Job>>,
    registry: Arc<Registry>,
    index: usize,
}

// The worker-thread pointer is set on the thread's own stack for the
// duration of its main loop, so that `enqueue` can find the local deque.
thread_local! {
    static WORKER_THREAD_STATE: Cell<*const WorkerThread> = const { Cell::new(ptr::null()) };
}

impl WorkerThread {
    fn current() -> *const WorkerThread {
        WORKER_THREAD_STATE.with(Cell::get)
    }

    unsafe fn set_current(thread: *const WorkerThread) {
        WORKER_THREAD_STATE.with(|t| t.set(thread));
    }

    fn find_work(&self) -> Option<Box<dyn Job>> {
        self.take_local().or_else(|| self.steal())
    }

    fn take_local(&self) -> Option<Box<dyn Job>> {
        let job = self.worker.pop();
        if job.is_some() {
            log!(PoppedJob { worker: self.index });
        }
        job
    }

    /// Try the shared injector first, then steal from siblings, starting
    /// just past our own index to spread contention.
    fn steal(&self) -> Option<Box<dyn Job>> {
        if let Some(job) = self.registry.injector.pop() {
            log!(UninjectedWork { worker: self.index });
            return Some(job);
        }

        let num_threads = self.registry.stealers.len();
        for offset in 1..num_threads {
            let victim_index = (self.index + offset) % num_threads;
            let victim = &self.registry.stealers[victim_index];
            loop {
                match victim.steal() {
                    Steal::Success(job) => {
                        log!(StoleWork {
                            worker: self.index,
                            victim: victim_index
                        });
                        return Some(job);
                    }
                    Steal::Empty => break,
                    Steal::Retry => {}
                }
            }
        }
        None
    }
}

fn main_loop(worker: Worker<Box<dyn Job>>, registry: Arc<Registry>, index: usize) {
    let worker_thread = WorkerThread {
        worker,
        registry: Arc::clone(&registry),
        index,
    };
    unsafe {
        WorkerThread::set_current(&worker_thread);
    }

    let queue = JobQueue {
        registry: Arc::clone(&registry),
    };

    let mut yields = 0;
    loop {
        if registry.terminate.probe() {
            break;
        }
        match worker_thread.find_work() {
            Some(job) => {
                yields = 0;
                registry.execute(job, &queue, index);
            }
            None => {
                yields = registry.sleep.no_work_found(&registry, index, yields);
            }
        }
    }

    unsafe {
        WorkerThread::set_current(ptr::null());
    }
}

pub(super) fn run<F>(mut builder: JobQueueBuilder, seed: F) -> Result<(), JobQueueBuildError>
where
    F: FnOnce(&JobQueue),
{
    let num_threads = builder.get_num_threads();
    let stack_size = builder.get_stack_size();

    let workers: Vec<Worker<Box<dyn Job>>> = (0..num_threads).map(|_| Worker::new_fifo()).collect();
    let stealers = workers.iter().map(Worker::stealer).collect();

    let registry = Arc::new(Registry {
        stealers,
        injector: SegQueue::new(),
        sleep: Sleep::new(),
        active_jobs: AtomicUsize::new(0),
        terminate: CoreLatch::new(),
        quiescent: LockLatch::new(),
        panic: Mutex::new(None),
    });

    let mut handles = Vec::with_capacity(num_threads);
    for (index, worker) in workers.into_iter().enumerate() {
        let thread_registry = Arc::clone(&registry);
        let name = builder
            .get_thread_name(index)
            .unwrap_or_else(|| format!("strsort-worker-{}", index));
        let mut b = thread::Builder::new().name(name);
        if let Some(size) = stack_size {
            b = b.stack_size(size);
        }
        match b.spawn(move || main_loop(worker, thread_registry, index)) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                // Shut down whatever we managed to start before reporting.
                registry.terminate.set();
                registry.sleep.tickle_all();
                for handle in handles {
                    let _ = handle.join();
                }
                return Err(JobQueueBuildError::new(ErrorKind::IOError(e)));
            }
        }
    }

    let queue = JobQueue {
        registry: Arc::clone(&registry),
    };

    // A panicking seed must still shut the workers down before unwinding
    // out of here, or they would spin on a leaked registry forever.
    let seeded = unwind::halt_unwinding(|| seed(&queue));
    if seeded.is_err() {
        registry.terminate.set();
        registry.quiescent.set();
    }

    // A seed that enqueued nothing leaves nothing to wait for.
    if registry.active_jobs.load(Ordering::SeqCst) == 0 {
        registry.quiescent.set();
    }

    registry.quiescent.wait();
    registry.terminate.set();
    registry.sleep.tickle_all();

    for handle in handles {
        let _ = handle.join();
    }

    if let Err(payload) = seeded {
        unwind::resume_unwinding(payload);
    }
    if let Some(payload) = registry.panic.lock().unwrap().take() {
        unwind::resume_unwinding(payload);
    }

    Ok(())
}
