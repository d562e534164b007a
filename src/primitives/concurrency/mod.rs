use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::types::Result;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of named threads draining a shared FIFO of jobs.
///
/// Jobs run in submission order per worker but may complete out of order across workers.
/// Dropping the pool runs the jobs still queued and then joins every worker.
pub struct WorkerPool {
    name: &'static str,
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

struct PoolShared {
    state: Mutex<PoolState>,
    wakeup: Condvar,
}

#[derive(Default)]
struct PoolState {
    jobs: VecDeque<Job>,
    shutdown: bool,
}

impl WorkerPool {
    /// Spawns `threads` workers (at least one) named `{name}-{i}`.
    pub fn new(name: &'static str, threads: usize) -> Result<Self> {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState::default()),
            wakeup: Condvar::new(),
        });
        let mut workers = Vec::with_capacity(threads.max(1));
        for i in 0..threads.max(1) {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || Self::worker_loop(&shared))?;
            workers.push(handle);
        }
        debug!(pool = name, threads = workers.len(), "pool.spawned");
        Ok(Self {
            name,
            shared,
            workers,
        })
    }

    /// Queues `job`. Returns `false` once the pool is shutting down.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return false;
        }
        state.jobs.push_back(Box::new(job));
        self.shared.wakeup.notify_one();
        true
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.state.lock().jobs.len()
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Stops accepting jobs, drains the queue and joins the workers.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown && self.workers.is_empty() {
                return;
            }
            state.shutdown = true;
            self.shared.wakeup.notify_all();
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                debug!(pool = self.name, "pool.worker_panicked");
            }
        }
        debug!(pool = self.name, "pool.shutdown");
    }

    fn worker_loop(shared: &PoolShared) {
        loop {
            let job = {
                let mut state = shared.state.lock();
                loop {
                    if let Some(job) = state.jobs.pop_front() {
                        break job;
                    }
                    if state.shutdown {
                        return;
                    }
                    shared.wakeup.wait(&mut state);
                }
            };
            job();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
