//! Strsort-core houses the job-queue runtime of the strsort string-sorting
//! engine.
//!
//! The runtime is a bag of pending jobs executed by a fixed set of worker
//! threads. Jobs are enqueued with [`JobQueue::enqueue`] and may enqueue
//! further jobs while running; the queue is drained until the transitive
//! closure of jobs is exhausted, at which point [`JobQueueBuilder::run`]
//! returns. Workers that find no work go to sleep; a running job can poll
//! [`JobQueue::has_idle`] as a cheap hint that donating some of its pending
//! work as fresh jobs would pay off.
//!
//! [`JobQueue::enqueue`]: struct.JobQueue.html#method.enqueue
//! [`JobQueue::has_idle`]: struct.JobQueue.html#method.has_idle
//! [`JobQueueBuilder::run`]: struct.JobQueueBuilder.html#method.run

#![deny(missing_debug_implementations)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

use std::env;
use std::error::Error;
use std::fmt;
use std::io;
use std::str::FromStr;

#[macro_use]
mod log;

mod job;
mod latch;
mod registry;
mod sleep;
mod unwind;

mod test;

pub use self::job::{FnJob, Job};
pub use self::registry::JobQueue;

/// Error when setting up a job queue.
#[derive(Debug)]
pub struct JobQueueBuildError {
    kind: ErrorKind,
}

#[derive(Debug)]
enum ErrorKind {
    IOError(io::Error),
}

impl JobQueueBuildError {
    fn new(kind: ErrorKind) -> JobQueueBuildError {
        JobQueueBuildError { kind }
    }
}

impl Error for JobQueueBuildError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self.kind {
            ErrorKind::IOError(ref e) => Some(e),
        }
    }
}

impl fmt::Display for JobQueueBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::IOError(ref e) => e.fmt(f),
        }
    }
}

/// Used to create a [`JobQueue`] with a custom configuration.
///
/// ```rust
/// strsort_core::JobQueueBuilder::new()
///     .num_threads(2)
///     .run(|queue| {
///         queue.enqueue(Box::new(strsort_core::FnJob(|_: &strsort_core::JobQueue| {
///             // root job
///         })));
///     })
///     .unwrap();
/// ```
///
/// [`JobQueue`]: struct.JobQueue.html
pub struct JobQueueBuilder {
    /// The number of worker threads. If zero, the `STRSORT_THREADS`
    /// environment variable is consulted; if that is unset or invalid, one
    /// worker per logical CPU is used.
    num_threads: usize,

    /// The stack size for the created worker threads.
    stack_size: Option<usize>,

    /// Closure to compute the name of a worker thread.
    get_thread_name: Option<Box<dyn FnMut(usize) -> String>>,
}

impl Default for JobQueueBuilder {
    fn default() -> Self {
        JobQueueBuilder {
            num_threads: 0,
            stack_size: None,
            get_thread_name: None,
        }
    }
}

impl fmt::Debug for JobQueueBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // closures can't be printed; just note whether one was set
        let get_thread_name = self.get_thread_name.as_ref().map(|_| "<closure>");
        f.debug_struct("JobQueueBuilder")
            .field("num_threads", &self.num_threads)
            .field("stack_size", &self.stack_size)
            .field("get_thread_name", &get_thread_name)
            .finish()
    }
}

impl JobQueueBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> JobQueueBuilder {
        JobQueueBuilder::default()
    }

    /// Sets the number of worker threads.
    ///
    /// The default of zero means: use the `STRSORT_THREADS` environment
    /// variable if set to a positive integer, otherwise one worker per
    /// logical CPU.
    pub fn num_threads(mut self, num_threads: usize) -> JobQueueBuilder {
        self.num_threads = num_threads;
        self
    }

    /// Sets the stack size of the worker threads.
    pub fn stack_size(mut self, stack_size: usize) -> JobQueueBuilder {
        self.stack_size = Some(stack_size);
        self
    }

    /// Sets a closure which takes a thread index and returns the thread's
    /// name. By default, workers are named `strsort-worker-<index>`.
    pub fn thread_name<F>(mut self, closure: F) -> JobQueueBuilder
    where
        F: FnMut(usize) -> String + 'static,
    {
        self.get_thread_name = Some(Box::new(closure));
        self
    }

    fn get_thread_name(&mut self, index: usize) -> Option<String> {
        let f = self.get_thread_name.as_mut()?;
        Some(f(index))
    }

    fn get_num_threads(&self) -> usize {
        if self.num_threads > 0 {
            return self.num_threads;
        }
        match env::var("STRSORT_THREADS")
            .ok()
            .and_then(|s| usize::from_str(&s).ok())
        {
            Some(x) if x > 0 => x,
            _ => num_cpus::get(),
        }
    }

    fn get_stack_size(&self) -> Option<usize> {
        self.stack_size
    }

    /// Spawns the worker threads, invokes `seed` to enqueue the root jobs,
    /// and returns once the queue is empty and every worker is idle.
    ///
    /// Jobs enqueued by `seed` and, transitively, by running jobs are all
    /// executed before this returns. If a job panics, the queue stops
    /// scheduling further jobs and the first panic payload is resumed on the
    /// calling thread after the workers have shut down.
    pub fn run<F>(self, seed: F) -> Result<(), JobQueueBuildError>
    where
        F: FnOnce(&JobQueue),
    {
        registry::run(self, seed)
    }
}

/// Resolves the worker count a default-configured queue would use.
///
/// Handy when callers want to size their work partitioning before building
/// the queue itself.
pub fn default_num_threads() -> usize {
    JobQueueBuilder::new().get_num_threads()
}
