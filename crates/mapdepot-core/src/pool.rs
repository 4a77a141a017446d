//! Bounded worker pool for fetch jobs.
//!
//! `W` OS threads pull boxed jobs from a shared FIFO. `submit` never drops
//! work: when every worker is busy the job waits in the queue. `drain_and_wait`
//! blocks until the queue is empty and no job is running, which also covers
//! jobs submitted while the drain is already waiting.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::error::ResolveError;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    /// Queued plus running jobs.
    pending: usize,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<Queue>,
    work_ready: Condvar,
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        // Jobs run outside the lock, so a poisoned guard still holds a consistent queue.
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one).
    pub fn new(size: usize) -> std::io::Result<Self> {
        let size = size.max(1);
        let shared = Arc::new(Shared::default());
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("mapdepot-fetch-{}", i))
                .spawn(move || worker_loop(&shared))?;
            workers.push(handle);
        }
        tracing::debug!(workers = size, "worker pool started");
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a job. Fails only after `close`.
    pub fn submit<F>(&self, job: F) -> Result<(), ResolveError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.lock();
        if queue.closed {
            return Err(ResolveError::PoolClosed);
        }
        queue.jobs.push_back(Box::new(job));
        queue.pending += 1;
        drop(queue);
        self.shared.work_ready.notify_one();
        Ok(())
    }

    /// Block until every submitted job has finished.
    pub fn drain_and_wait(&self) {
        let mut queue = self.shared.lock();
        while queue.pending > 0 {
            queue = self
                .shared
                .idle
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Drain outstanding work, stop accepting jobs and join the workers.
    /// Idempotent; also run on drop.
    pub fn close(&self) {
        self.drain_and_wait();
        self.shared.lock().closed = true;
        self.shared.work_ready.notify_all();

        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if handles.is_empty() {
            return;
        }
        for h in handles {
            if h.join().is_err() {
                tracing::warn!("fetch worker exited with a panic");
            }
        }
        tracing::debug!(workers = self.size, "worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                if queue.closed {
                    return;
                }
                queue = shared
                    .work_ready
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::warn!("fetch job panicked");
        }

        let mut queue = shared.lock();
        queue.pending -= 1;
        if queue.pending == 0 {
            shared.idle.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn runs_every_submitted_job() {
        let pool = WorkerPool::new(3).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let done = Arc::clone(&done);
            pool.submit(move || {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.drain_and_wait();
        assert_eq!(done.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn never_exceeds_worker_count() {
        let pool = WorkerPool::new(2).unwrap();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            pool.submit(move || {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                current.fetch_sub(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.drain_and_wait();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn drain_waits_for_jobs_submitted_by_jobs() {
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let done = Arc::new(AtomicUsize::new(0));
        {
            let inner_pool = Arc::clone(&pool);
            let done = Arc::clone(&done);
            pool.submit(move || {
                thread::sleep(Duration::from_millis(10));
                let done2 = Arc::clone(&done);
                inner_pool
                    .submit(move || {
                        thread::sleep(Duration::from_millis(10));
                        done2.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.drain_and_wait();
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_job_does_not_stall_drain() {
        let pool = WorkerPool::new(1).unwrap();
        pool.submit(|| panic!("boom")).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);
        pool.submit(move || {
            d.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        pool.drain_and_wait();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn submit_after_close_is_rejected() {
        let pool = WorkerPool::new(2).unwrap();
        pool.close();
        pool.close();
        assert_eq!(pool.submit(|| {}), Err(ResolveError::PoolClosed));
    }
}
