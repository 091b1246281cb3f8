//! Task pool for bucket-parallel dictionary batches
//!
//! Thin task-dispatch service over a rayon thread pool. A batch is a list
//! of independent tasks; every task writes its result into its own slot and
//! the caller returns only once all of them completed, so errors from worker
//! tasks are never lost.
//!
//! The pool can be resized while batches are in flight: a batch holds an
//! `Arc` to the pool it started on, and a resize swaps in a new pool for
//! later batches.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

/// Resizable worker pool
pub struct TaskPool {
    pool: RwLock<Arc<rayon::ThreadPool>>,
}

impl TaskPool {
    /// Create a pool with `threads` workers
    pub fn new(threads: usize) -> Result<Self> {
        Ok(Self {
            pool: RwLock::new(Arc::new(Self::build(threads)?)),
        })
    }

    fn build(threads: usize) -> Result<rayon::ThreadPool> {
        if threads == 0 {
            return Err(Error::NullArgument("threads"));
        }
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("strdict-worker-{}", i))
            .build()
            .map_err(|e| Error::InternalInconsistency(format!("Failed to build thread pool: {}", e)))
    }

    /// Number of worker threads
    pub fn threads(&self) -> usize {
        self.pool.read().current_num_threads()
    }

    /// Change the number of workers
    pub fn resize(&self, threads: usize) -> Result<()> {
        if threads == self.threads() {
            return Ok(());
        }
        let new_pool = Arc::new(Self::build(threads)?);
        let old = std::mem::replace(&mut *self.pool.write(), new_pool);
        info!(
            from = old.current_num_threads(),
            to = threads,
            "Resized task pool"
        );
        Ok(())
    }

    /// Run every task and wait for all of them.
    ///
    /// Results are returned in task order regardless of completion order.
    pub fn execute<T, F>(&self, tasks: Vec<F>) -> Vec<Result<T>>
    where
        F: FnOnce() -> Result<T> + Send,
        T: Send,
    {
        let pool = Arc::clone(&*self.pool.read());
        let mut slots: Vec<Option<Result<T>>> = (0..tasks.len()).map(|_| None).collect();

        pool.scope(|scope| {
            for (task, slot) in tasks.into_iter().zip(slots.iter_mut()) {
                scope.spawn(move |_| {
                    *slot = Some(task());
                });
            }
        });

        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.unwrap_or_else(|| {
                    Err(Error::InternalInconsistency(format!(
                        "task {} finished without a result",
                        i
                    )))
                })
            })
            .collect()
    }

    /// Run a single task and wait for it
    pub fn run<T, F>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send,
        T: Send,
    {
        let pool = Arc::clone(&*self.pool.read());
        pool.install(task)
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("threads", &self.threads())
            .finish()
    }
}
