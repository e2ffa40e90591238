#![cfg(test)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{FnJob, JobQueue, JobQueueBuilder};

#[test]
fn empty_seed_returns() {
    JobQueueBuilder::new().num_threads(2).run(|_| {}).unwrap();
}

#[test]
fn runs_all_jobs() {
    let count = Arc::new(AtomicUsize::new(0));
    let seed_count = Arc::clone(&count);
    JobQueueBuilder::new()
        .num_threads(4)
        .run(move |queue| {
            for _ in 0..100 {
                let count = Arc::clone(&seed_count);
                queue.enqueue(Box::new(FnJob(move |_: &JobQueue| {
                    count.fetch_add(1, Ordering::SeqCst);
                })));
            }
        })
        .unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 100);
}

#[test]
fn nested_jobs_all_run() {
    // Each job fans out into children; quiescence must only be declared
    // once the whole tree has executed.
    fn fan_out(queue: &JobQueue, depth: usize, count: Arc<AtomicUsize>) {
        count.fetch_add(1, Ordering::SeqCst);
        if depth > 0 {
            for _ in 0..3 {
                let count = Arc::clone(&count);
                queue.enqueue(Box::new(FnJob(move |queue: &JobQueue| {
                    fan_out(queue, depth - 1, count);
                })));
            }
        }
    }

    let count = Arc::new(AtomicUsize::new(0));
    let seed_count = Arc::clone(&count);
    JobQueueBuilder::new()
        .num_threads(4)
        .run(move |queue| {
            queue.enqueue(Box::new(FnJob(move |queue: &JobQueue| {
                fan_out(queue, 6, seed_count);
            })));
        })
        .unwrap();

    // 1 + 3 + 9 + ... + 3^6 nodes
    assert_eq!(count.load(Ordering::SeqCst), (3usize.pow(7) - 1) / 2);
}

#[test]
fn single_worker_runs_everything() {
    let count = Arc::new(AtomicUsize::new(0));
    let seed_count = Arc::clone(&count);
    JobQueueBuilder::new()
        .num_threads(1)
        .run(move |queue| {
            for _ in 0..10 {
                let count = Arc::clone(&seed_count);
                queue.enqueue(Box::new(FnJob(move |queue: &JobQueue| {
                    let count2 = Arc::clone(&count);
                    queue.enqueue(Box::new(FnJob(move |_: &JobQueue| {
                        count2.fetch_add(1, Ordering::SeqCst);
                    })));
                    count.fetch_add(1, Ordering::SeqCst);
                })));
            }
        })
        .unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 20);
}

#[test]
#[should_panic(expected = "Hello, world!")]
fn panic_propagates_to_caller() {
    JobQueueBuilder::new()
        .num_threads(2)
        .run(|queue| {
            queue.enqueue(Box::new(FnJob(|_: &JobQueue| {
                panic!("Hello, world!");
            })));
        })
        .unwrap();
}

#[test]
fn idle_workers_become_visible() {
    // With a worker pinned in a long-running job and nothing else queued,
    // the remaining workers eventually park and `has_idle` reports it.
    let observed = Arc::new(AtomicUsize::new(0));
    let seed_observed = Arc::clone(&observed);
    JobQueueBuilder::new()
        .num_threads(4)
        .run(move |queue| {
            let observed = seed_observed;
            queue.enqueue(Box::new(FnJob(move |queue: &JobQueue| {
                let start = Instant::now();
                while start.elapsed() < Duration::from_secs(10) {
                    if queue.has_idle() {
                        observed.store(1, Ordering::SeqCst);
                        return;
                    }
                    std::thread::yield_now();
                }
            })));
        })
        .unwrap();
    assert_eq!(observed.load(Ordering::SeqCst), 1);
}

#[test]
fn custom_thread_names() {
    let seen = Arc::new(AtomicUsize::new(0));
    let seed_seen = Arc::clone(&seen);
    JobQueueBuilder::new()
        .num_threads(2)
        .thread_name(|i| format!("queue-test-{}", i))
        .run(move |queue| {
            for _ in 0..8 {
                let seen = Arc::clone(&seed_seen);
                queue.enqueue(Box::new(FnJob(move |_: &JobQueue| {
                    let name = std::thread::current().name().unwrap().to_owned();
                    assert!(name.starts_with("queue-test-"), "unexpected name {}", name);
                    seen.fetch_add(1, Ordering::SeqCst);
                })));
            }
        })
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 8);
}

#[test]
fn num_threads_exposed_on_handle() {
    JobQueueBuilder::new()
        .num_threads(3)
        .run(|queue| {
            assert_eq!(queue.num_threads(), 3);
        })
        .unwrap();
}
