//! Bounded worker pool executing handler invocations off the publisher's thread.
//!
//! ```text
//!   submit(task) ──try_send──► [bounded queue] ──► worker 0 ─► task()
//!        │                            │        ──► worker 1 ─► task()
//!        └─ false if full/stopping    └─────── ──► worker N ─► task()
//! ```
//!
//! ## Rules
//! - `submit` never blocks: a full queue, a stopping pool or a pool without
//!   workers returns `false`.
//! - A panicking task is caught at the worker boundary and counted; the worker
//!   moves on to the next task.
//! - `stop` refuses new work, lets workers drain what was already accepted,
//!   and joins them. A task that never returns blocks `stop` forever.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle, ThreadId},
};

use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::sync::CancellationToken;

use crate::{Error, Result, internal::panic_message};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Snapshot of a pool's lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks accepted into the queue.
    pub submitted: u64,
    /// Tasks refused because the queue was full or the pool was stopping.
    pub rejected: u64,
    /// Tasks that ran to completion.
    pub completed: u64,
    /// Tasks that panicked.
    pub panicked: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

/// Fixed set of OS worker threads draining a bounded FIFO of tasks.
///
/// Create with [`new`](WorkerPool::new), call [`start`](WorkerPool::start)
/// once, then [`submit`](WorkerPool::submit) from any thread. The pool is
/// stopped on drop if [`stop`](WorkerPool::stop) wasn't called.
pub struct WorkerPool {
    size: usize,
    capacity: usize,
    sender: RwLock<Option<Sender<Task>>>,
    receiver: Arc<Mutex<Receiver<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: RwLock<Vec<ThreadId>>,
    started: AtomicBool,
    stop_token: CancellationToken,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Creates a pool of `size` workers sharing a queue of `capacity` slots.
    ///
    /// A capacity of zero is clamped to one. No threads are spawned until
    /// [`start`](WorkerPool::start).
    pub fn new(size: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel::<Task>(capacity);
        Self {
            size,
            capacity,
            sender: RwLock::new(Some(tx)),
            receiver: Arc::new(Mutex::new(rx)),
            workers: Mutex::new(Vec::with_capacity(size)),
            worker_ids: RwLock::new(Vec::with_capacity(size)),
            started: AtomicBool::new(false),
            stop_token: CancellationToken::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Spawns the workers. Fails with [`Error::PoolAlreadyStarted`] when
    /// called a second time.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::PoolAlreadyStarted);
        }

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut worker_ids = self.worker_ids.write().unwrap_or_else(PoisonError::into_inner);
        for n in 0..self.size {
            let receiver = self.receiver.clone();
            let counters = self.counters.clone();
            let handle = thread::Builder::new()
                .name(format!("pulse-worker-{n}"))
                .spawn(move || worker_loop(receiver, counters))?;
            worker_ids.push(handle.thread().id());
            workers.push(handle);
        }

        tracing::debug!(workers = self.size, capacity = self.capacity, "Worker pool started");
        Ok(())
    }

    /// Enqueues `task` without blocking.
    ///
    /// Returns `false` if the pool is stopping, has no workers or the queue
    /// is full. `true` means the task was accepted; it runs before
    /// [`stop`](WorkerPool::stop) returns.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let accepted = self.size > 0 && !self.stop_token.is_cancelled() && {
            let sender = self.sender.read().unwrap_or_else(PoisonError::into_inner);
            sender
                .as_ref()
                .is_some_and(|s| s.try_send(Box::new(task)).is_ok())
        };

        let counter = if accepted {
            &self.counters.submitted
        } else {
            &self.counters.rejected
        };
        counter.fetch_add(1, Ordering::Relaxed);
        accepted
    }

    /// Stops accepting tasks and blocks until every worker has drained the
    /// queue and exited.
    ///
    /// Calling it again is a no-op. Called from one of the pool's own workers
    /// it can't wait for itself: the pool still stops accepting work, the
    /// workers are detached and [`Error::StopFromWorker`] is returned.
    pub fn stop(&self) -> Result<()> {
        self.stop_token.cancel();
        drop(
            self.sender
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let handles = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if handles.is_empty() {
            return Ok(());
        }

        if self.is_worker_thread() {
            return Err(Error::StopFromWorker);
        }

        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("Pool worker terminated abnormally");
            }
        }
        tracing::debug!(stats = ?self.stats(), "Worker pool stopped");
        Ok(())
    }

    /// True once [`stop`](WorkerPool::stop) has been called.
    pub fn is_stopping(&self) -> bool {
        self.stop_token.is_cancelled()
    }

    /// True when called from one of this pool's worker threads.
    pub fn is_worker_thread(&self) -> bool {
        let current = thread::current().id();
        self.worker_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&current)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Effective queue capacity (after clamping).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "Worker pool dropped without a clean stop");
        }
    }
}

fn worker_loop(receiver: Arc<Mutex<Receiver<Task>>>, counters: Arc<Counters>) {
    loop {
        // Only the waiting worker holds the lock; tasks run without it.
        let task = {
            let mut receiver = receiver.lock().unwrap_or_else(PoisonError::into_inner);
            receiver.blocking_recv()
        };
        let Some(task) = task else {
            break;
        };

        match catch_unwind(AssertUnwindSafe(task)) {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    panic = %panic_message(payload.as_ref()),
                    "Pool task panicked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{Barrier, atomic::AtomicUsize},
        time::{Duration, Instant},
    };

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn executes_submitted_task() {
        let pool = WorkerPool::new(2, 10);
        pool.start().unwrap();

        let executed = counter();
        let e = executed.clone();
        assert!(pool.submit(move || {
            e.fetch_add(1, Ordering::SeqCst);
        }));

        pool.stop().unwrap();
        assert_eq!(executed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().completed, 1);
    }

    #[test]
    fn start_twice_is_rejected() {
        let pool = WorkerPool::new(1, 1);
        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(Error::PoolAlreadyStarted)));
    }

    #[test]
    fn never_runs_more_tasks_than_workers() {
        let workers = 3;
        let pool = WorkerPool::new(workers, 10);
        pool.start().unwrap();

        let running = counter();
        let max_running = counter();
        // Each batch of `workers` tasks only passes the barrier together.
        let barrier = Arc::new(Barrier::new(workers));

        for _ in 0..workers * 2 {
            let running = running.clone();
            let max_running = max_running.clone();
            let barrier = barrier.clone();
            assert!(pool.submit(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_running.fetch_max(now, Ordering::SeqCst);
                barrier.wait();
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        pool.stop().unwrap();
        assert_eq!(max_running.load(Ordering::SeqCst), workers);
        assert_eq!(pool.stats().completed, (workers * 2) as u64);
    }

    #[test]
    fn rejects_when_queue_is_full() {
        let capacity = 2;
        let pool = WorkerPool::new(1, capacity);
        pool.start().unwrap();

        let executed = counter();
        let mut accepted = 0;
        for _ in 0..capacity + 5 {
            let e = executed.clone();
            if pool.submit(move || {
                e.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
            }) {
                accepted += 1;
            }
        }

        // The queue holds `capacity`; the single worker may already hold one more.
        assert!(accepted >= capacity && accepted <= capacity + 1);
        assert_eq!(pool.stats().rejected, (capacity + 5 - accepted) as u64);

        pool.stop().unwrap();
        assert_eq!(executed.load(Ordering::SeqCst), accepted);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let pool = WorkerPool::new(1, 0);
        assert_eq!(pool.capacity(), 1);
        pool.start().unwrap();

        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        assert!(pool.submit(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        }));
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // The worker is busy, so exactly one more task fits.
        assert!(pool.submit(|| {}));
        assert!(!pool.submit(|| {}));

        release_tx.send(()).unwrap();
        pool.stop().unwrap();
        assert_eq!(pool.stats().completed, 2);
    }

    #[test]
    fn zero_workers_rejects_submissions() {
        let pool = WorkerPool::new(0, 4);
        pool.start().unwrap();

        let executed = counter();
        let e = executed.clone();
        assert!(!pool.submit(move || {
            e.fetch_add(1, Ordering::SeqCst);
        }));

        pool.stop().unwrap();
        assert_eq!(executed.load(Ordering::SeqCst), 0);
        let stats = pool.stats();
        assert_eq!(stats.submitted, 0);
        assert_eq!(stats.rejected, 1);
    }

    #[test]
    fn knows_its_worker_threads() {
        let pool = Arc::new(WorkerPool::new(1, 4));
        pool.start().unwrap();
        assert!(!pool.is_worker_thread());

        let (tx, rx) = std::sync::mpsc::channel();
        let p = pool.clone();
        assert!(pool.submit(move || {
            let _ = tx.send(p.is_worker_thread());
        }));
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        pool.stop().unwrap();
    }

    #[test]
    fn submit_after_stop_is_rejected() {
        let pool = WorkerPool::new(2, 10);
        pool.start().unwrap();
        pool.stop().unwrap();

        assert!(pool.is_stopping());
        assert!(!pool.submit(|| {}));
        assert_eq!(pool.stats().rejected, 1);
    }

    #[test]
    fn stop_waits_for_accepted_tasks() {
        let pool = WorkerPool::new(2, 10);
        pool.start().unwrap();

        let executed = counter();
        for _ in 0..5 {
            let e = executed.clone();
            assert!(pool.submit(move || {
                std::thread::sleep(Duration::from_millis(50));
                e.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let started = Instant::now();
        pool.stop().unwrap();
        assert_eq!(executed.load(Ordering::SeqCst), 5);
        assert!(started.elapsed() >= Duration::from_millis(50));

        // Second stop is a no-op.
        pool.stop().unwrap();
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let pool = WorkerPool::new(1, 10);
        pool.start().unwrap();

        let executed = counter();
        let e = executed.clone();
        assert!(pool.submit(|| panic!("test panic")));
        assert!(pool.submit(move || {
            e.fetch_add(1, Ordering::SeqCst);
        }));

        pool.stop().unwrap();
        assert_eq!(executed.load(Ordering::SeqCst), 1);
        let stats = pool.stats();
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn stop_from_worker_is_refused() {
        let pool = Arc::new(WorkerPool::new(1, 4));
        pool.start().unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let p = pool.clone();
        assert!(pool.submit(move || {
            let _ = tx.send(p.stop());
        }));

        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(result, Err(Error::StopFromWorker)));
        assert!(!pool.submit(|| {}));
    }

    #[test]
    fn stress_submissions_are_all_accounted_for() {
        let pool = WorkerPool::new(5, 50);
        pool.start().unwrap();

        let executed = counter();
        for _ in 0..100 {
            let e = executed.clone();
            pool.submit(move || {
                e.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.stop().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.submitted + stats.rejected, 100);
        assert_eq!(executed.load(Ordering::SeqCst) as u64, stats.submitted);
        assert!(stats.submitted > 0);
    }
}
