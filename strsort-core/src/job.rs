use std::fmt;

use crate::registry::JobQueue;

/// A unit of work executed by the queue's worker threads.
///
/// Jobs are always heap-owned: they are enqueued as `Box<dyn Job>` and
/// consumed by their single `run` invocation. A running job receives the
/// queue handle so that it can enqueue child jobs, and may poll
/// [`JobQueue::has_idle`] to decide whether to donate pending work.
///
/// [`JobQueue::has_idle`]: struct.JobQueue.html#method.has_idle
pub trait Job: Send {
    /// Executes the job, consuming it.
    fn run(self: Box<Self>, queue: &JobQueue);
}

/// Adapter that turns a closure into a [`Job`] — the convenient form for
/// root jobs and tests. Long-lived sorting steps implement `Job` on their
/// own types instead.
///
/// [`Job`]: trait.Job.html
pub struct FnJob<F>(pub F);

impl<F> fmt::Debug for FnJob<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnJob").finish()
    }
}

impl<F> Job for FnJob<F>
where
    F: FnOnce(&JobQueue) + Send,
{
    fn run(self: Box<Self>, queue: &JobQueue) {
        (self.0)(queue)
    }
}
