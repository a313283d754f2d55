use std::collections::VecDeque;
use std::sync::{mpsc, Mutex};
use std::thread;

use crate::error::{DeployError, Result};

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 64;

/// Fixed-size pool of scoped OS threads.
///
/// Jobs may borrow from the caller's stack; every job runs to completion on
/// one worker and `run` returns only after all workers have joined.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&size) {
            return Err(DeployError::Config(format!(
                "parallelism must be between {MIN_WORKERS} and {MAX_WORKERS} (got {size})"
            )));
        }
        Ok(Self { size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run every job and return the outputs in submission order.
    pub fn run<T, F>(&self, jobs: Vec<F>) -> Result<Vec<T>>
    where
        T: Send,
        F: FnOnce() -> T + Send,
    {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let expected_count = jobs.len();
        let worker_count = self.size.min(expected_count);
        let queue: Mutex<VecDeque<(usize, F)>> = Mutex::new(jobs.into_iter().enumerate().collect());
        let (tx, rx) = mpsc::channel::<(usize, T)>();

        let mut out: Vec<(usize, T)> = Vec::with_capacity(expected_count);
        let mut panicked = false;

        thread::scope(|scope| -> Result<()> {
            let mut handles = Vec::with_capacity(worker_count);
            for n in 0..worker_count {
                let queue = &queue;
                let tx = tx.clone();
                let handle = thread::Builder::new()
                    .name(format!("deploy-worker-{n}"))
                    .spawn_scoped(scope, move || loop {
                        let job = match queue.lock() {
                            Ok(mut q) => q.pop_front(),
                            Err(_) => None,
                        };
                        let Some((index, run)) = job else {
                            break;
                        };
                        let output = run();
                        if tx.send((index, output)).is_err() {
                            break;
                        }
                    })?;
                handles.push(handle);
            }
            drop(tx);

            out.extend(rx.iter());

            for h in handles {
                if h.join().is_err() {
                    panicked = true;
                }
            }
            Ok(())
        })?;

        if panicked {
            return Err(DeployError::Pool("worker thread panicked".to_string()));
        }
        if out.len() != expected_count {
            return Err(DeployError::Pool(format!(
                "output count mismatch (expected {expected_count}, got {})",
                out.len()
            )));
        }

        out.sort_by_key(|(idx, _)| *idx);
        Ok(out.into_iter().map(|(_, v)| v).collect())
    }
}
