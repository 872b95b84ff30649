//! Fixed-size worker pool
//!
//! [`WorkerPool`] spawns `K` named OS threads that pull boxed closures from a
//! shared crossbeam channel. Submission is fire-and-forget: a task's error or
//! panic is caught at the dispatch boundary, counted, logged and handed to an
//! optional error handler, but never reaches the submitter and never takes
//! the worker thread down.
//!
//! Callers that need a result use [`WorkerPool::spawn_with_handle`], which
//! returns a [`TaskHandle`] backed by a one-shot channel.
//!
//! # Shutdown
//!
//! [`WorkerPool::shutdown`] drops the task sender. Workers keep receiving
//! until the queue is empty and only then see the disconnect, so every task
//! submitted before shutdown runs before `shutdown` returns.

use crate::error::{ReservoirError, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A unit of work run by the pool
pub type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Callback receiving every task failure
pub type ErrorHandler = Arc<dyn Fn(&ReservoirError) + Send + Sync>;

/// Counters shared by all workers of a pool
#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

/// Snapshot of pool activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks accepted by [`WorkerPool::submit`]
    pub submitted: u64,
    /// Tasks that returned `Ok`
    pub completed: u64,
    /// Tasks that returned `Err` or panicked
    pub failed: u64,
    /// Subset of `failed` that panicked
    pub panicked: u64,
    /// Tasks waiting in the queue
    pub queued: usize,
}

/// Fixed set of worker threads executing submitted closures
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<PoolCounters>,
    thread_count: usize,
}

impl WorkerPool {
    /// Create a pool with `size` worker threads (minimum 1)
    pub fn new(size: usize) -> Result<Self> {
        Self::build(size, None)
    }

    /// Create a pool that reports every task failure to `handler`
    pub fn with_error_handler<F>(size: usize, handler: F) -> Result<Self>
    where
        F: Fn(&ReservoirError) + Send + Sync + 'static,
    {
        Self::build(size, Some(Arc::new(handler)))
    }

    fn build(size: usize, handler: Option<ErrorHandler>) -> Result<Self> {
        let size = size.max(1);
        let (sender, receiver) = unbounded::<Job>();
        let counters = Arc::new(PoolCounters::default());

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let receiver = receiver.clone();
            let counters = counters.clone();
            let handler = handler.clone();
            let handle = thread::Builder::new()
                .name(format!("pool-worker-{}", index))
                .spawn(move || worker_loop(index, receiver, counters, handler))?;
            workers.push(handle);
        }

        tracing::info!("Worker pool started with {} threads", size);

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            counters,
            thread_count: size,
        })
    }

    /// Queue a task. Fails only if the pool has been shut down.
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = sender.as_ref().ok_or(ReservoirError::PoolShutdown)?;
        // Counted before the send so completed never runs ahead of submitted
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        if sender.send(Box::new(task)).is_err() {
            self.counters.submitted.fetch_sub(1, Ordering::SeqCst);
            return Err(ReservoirError::PoolShutdown);
        }
        Ok(())
    }

    /// Queue a task that cannot fail
    pub fn execute<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(move || {
            task();
            Ok(())
        })
    }

    /// Queue a task and get a handle to wait for its return value
    pub fn spawn_with_handle<F, T>(&self, task: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = bounded(1);
        self.execute(move || {
            let _ = tx.send(task());
        })?;
        Ok(TaskHandle { receiver: rx })
    }

    /// Stop accepting tasks, run everything already queued, join all workers
    ///
    /// Idempotent; later calls return immediately.
    pub fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            return;
        }
        let pending = sender.as_ref().map(|s| s.len()).unwrap_or(0);
        drop(sender);
        tracing::debug!("Worker pool shutting down, {} tasks pending", pending);

        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!("Worker pool thread exited abnormally");
            }
        }

        tracing::info!("Worker pool stopped");
    }

    /// True until [`shutdown`](Self::shutdown) is called
    pub fn is_running(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Number of worker threads
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Tasks waiting to be picked up
    pub fn queued_tasks(&self) -> usize {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Snapshot of the pool counters
    ///
    /// Finished counts are read before `submitted`, so
    /// `completed + failed <= submitted` holds in every snapshot.
    pub fn stats(&self) -> PoolStats {
        let completed = self.counters.completed.load(Ordering::SeqCst);
        let failed = self.counters.failed.load(Ordering::SeqCst);
        let panicked = self.counters.panicked.load(Ordering::SeqCst);
        PoolStats {
            completed,
            failed,
            panicked,
            submitted: self.counters.submitted.load(Ordering::SeqCst),
            queued: self.queued_tasks(),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("thread_count", &self.thread_count)
            .field("stats", &self.stats())
            .finish()
    }
}

fn worker_loop(
    index: usize,
    receiver: Receiver<Job>,
    counters: Arc<PoolCounters>,
    handler: Option<ErrorHandler>,
) {
    tracing::debug!("Pool worker {} started", index);

    // recv() keeps returning queued jobs after the sender is dropped and
    // only errors once the queue is empty.
    while let Ok(job) = receiver.recv() {
        let error = match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(Ok(())) => {
                counters.completed.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            Ok(Err(e)) => {
                tracing::warn!("Pool task failed on worker {}: {}", index, e);
                e
            }
            Err(payload) => {
                counters.panicked.fetch_add(1, Ordering::SeqCst);
                let message = panic_message(payload.as_ref());
                tracing::error!("Pool task panicked on worker {}: {}", index, message);
                ReservoirError::Task(format!("task panicked: {}", message))
            }
        };

        counters.failed.fetch_add(1, Ordering::SeqCst);
        if let Some(handler) = &handler {
            handler(&error);
        }
    }

    tracing::debug!("Pool worker {} stopped", index);
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Completion signal for a task queued with [`WorkerPool::spawn_with_handle`]
#[derive(Debug)]
pub struct TaskHandle<T> {
    receiver: Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Block until the task finishes and return its value
    ///
    /// Fails if the task panicked.
    pub fn wait(self) -> Result<T> {
        self.receiver
            .recv()
            .map_err(|_| ReservoirError::Task("task did not complete".to_string()))
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => {
                ReservoirError::Timeout(format!("task still running after {:?}", timeout))
            }
            RecvTimeoutError::Disconnected => {
                ReservoirError::Task("task did not complete".to_string())
            }
        })
    }
}
