//! Fixed-size worker pool draining a shared FIFO task queue.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::Context;

/// A unit of work executed exactly once on some worker thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    tasks: VecDeque<Task>,
    closed: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` worker threads.
    pub fn new(size: usize) -> anyhow::Result<Self> {
        anyhow::ensure!(size > 0, "worker pool needs at least one thread");

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                tasks: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("lantern-worker-{}", i))
                .spawn(move || worker_loop(i, &shared))
                .with_context(|| format!("failed to spawn worker {}", i))?;
            workers.push(handle);
        }

        tracing::debug!(workers = size, "worker pool started");
        Ok(Self { shared, workers })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a task and wake one idle worker.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut queue = self.shared.lock();
            if queue.closed {
                tracing::warn!("task submitted after pool shutdown, dropped");
                return;
            }
            queue.tasks.push_back(Box::new(task));
        }
        self.shared.available.notify_one();
    }

    /// Close the queue, wake every worker and join them. Workers finish the
    /// tasks already queued before exiting.
    pub fn shutdown(&mut self) {
        self.shared.lock().closed = true;
        self.shared.available.notify_all();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread terminated abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, shared: &Shared) {
    let mut queue = shared.lock();
    loop {
        if let Some(task) = queue.tasks.pop_front() {
            drop(queue);
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                tracing::error!(worker = id, "task panicked");
            }
            queue = shared.lock();
        } else if queue.closed {
            break;
        } else {
            queue = shared
                .available
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn runs_every_submitted_task() {
        let mut pool = WorkerPool::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..1000 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.shutdown();

        assert_eq!(counter.load(Ordering::SeqCst), 1000);
    }

    #[test]
    fn tasks_run_off_the_submitting_thread() {
        let pool = WorkerPool::new(2).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.submit(move || {
            tx.send(thread::current().name().map(str::to_owned)).unwrap();
        });

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name.starts_with("lantern-worker-"));
    }

    #[test]
    fn survives_a_panicking_task() {
        let mut pool = WorkerPool::new(1).unwrap();
        let (tx, rx) = mpsc::channel();

        pool.submit(|| panic!("boom"));
        pool.submit(move || tx.send(()).unwrap());

        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        pool.shutdown();
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(WorkerPool::new(0).is_err());
    }
}
