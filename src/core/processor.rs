//! Parallel task processor with dedicated worker threads.
//!
//! The reference [`Processor`] implementation: worker threads pull tasks
//! from a bounded channel and run each task's async `execute` on a
//! per-thread single-threaded tokio runtime, retrying failures under a
//! [`RetryPolicy`](crate::backoff::RetryPolicy). A task is acked on
//! success and nacked once retries are exhausted, the task panics, or the
//! processor shuts down first; every accepted task is settled exactly
//! once.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Select, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::backoff::{Retrier, RetryPolicy};
use crate::config::ProcessorConfig;
use crate::core::task::{ChannelKey, Processor, TaskRef};
use crate::core::{AppResult, SchedulerError};
use crate::util::TimeSource;

const STATUS_INITIAL: u8 = 0;
const STATUS_RUNNING: u8 = 1;
const STATUS_STOPPED: u8 = 2;

/// Internal counters for processor statistics (lock-free).
#[derive(Debug, Default)]
struct ProcessorCounters {
    accepted_tasks: AtomicU64,
    acked_tasks: AtomicU64,
    nacked_tasks: AtomicU64,
    retry_attempts: AtomicU64,
}

/// Point-in-time processor statistics.
#[derive(Debug, Clone, Default)]
pub struct ProcessorStats {
    /// Tasks accepted into the processor queue.
    pub accepted_tasks: u64,
    /// Tasks that executed successfully.
    pub acked_tasks: u64,
    /// Tasks that were nacked (exhausted retries, panicked, or drained at
    /// shutdown).
    pub nacked_tasks: u64,
    /// Execution retries performed across all tasks.
    pub retry_attempts: u64,
    /// Tasks currently waiting in the queue.
    pub queued_tasks: usize,
    /// Number of worker threads.
    pub worker_count: usize,
}

/// Worker pool executing tasks with retry.
pub struct ParallelTaskProcessor<K: ChannelKey> {
    inner: Arc<ProcessorInner<K>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct ProcessorInner<K: ChannelKey> {
    config: ProcessorConfig,
    retry_policy: Arc<dyn RetryPolicy>,
    time_source: Arc<dyn TimeSource>,
    counters: ProcessorCounters,
    status: AtomicU8,
    task_tx: Sender<TaskRef<K>>,
    task_rx: Receiver<TaskRef<K>>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
}

impl<K: ChannelKey> ParallelTaskProcessor<K> {
    /// Create a processor; workers are spawned on
    /// [`start`](Processor::start).
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidOptions`] when the configuration fails
    /// validation.
    pub fn new(
        config: ProcessorConfig,
        retry_policy: Arc<dyn RetryPolicy>,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidOptions)?;

        let (task_tx, task_rx) = bounded(config.queue_size);
        let (shutdown_tx, shutdown_rx) = bounded(0);

        Ok(Self {
            inner: Arc::new(ProcessorInner {
                config,
                retry_policy,
                time_source,
                counters: ProcessorCounters::default(),
                status: AtomicU8::new(STATUS_INITIAL),
                task_tx,
                task_rx,
                shutdown_tx: Mutex::new(Some(shutdown_tx)),
                shutdown_rx,
            }),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Get current processor statistics.
    #[must_use]
    pub fn stats(&self) -> ProcessorStats {
        let counters = &self.inner.counters;
        ProcessorStats {
            accepted_tasks: counters.accepted_tasks.load(Ordering::Relaxed),
            acked_tasks: counters.acked_tasks.load(Ordering::Relaxed),
            nacked_tasks: counters.nacked_tasks.load(Ordering::Relaxed),
            retry_attempts: counters.retry_attempts.load(Ordering::Relaxed),
            queued_tasks: self.inner.task_rx.len(),
            worker_count: self.inner.config.worker_count,
        }
    }
}

impl<K: ChannelKey> Processor<K> for ParallelTaskProcessor<K> {
    fn start(&self) {
        if self
            .inner
            .status
            .compare_exchange(
                STATUS_INITIAL,
                STATUS_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        let worker_count = self.inner.config.worker_count;
        let mut workers = self.workers.lock();
        for worker_id in 0..worker_count {
            let inner = Arc::clone(&self.inner);
            let handle = thread::Builder::new()
                .name(format!("task-processor-{worker_id}"))
                .spawn(move || worker_loop(worker_id, &inner))
                .expect("failed to spawn processor worker thread");
            workers.push(handle);
        }

        info!(worker_count, "parallel task processor started");
    }

    fn stop(&self) {
        let from_running = self
            .inner
            .status
            .compare_exchange(
                STATUS_RUNNING,
                STATUS_STOPPED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        let from_initial = !from_running
            && self
                .inner
                .status
                .compare_exchange(
                    STATUS_INITIAL,
                    STATUS_STOPPED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok();
        if !from_running && !from_initial {
            return;
        }

        *self.inner.shutdown_tx.lock() = None;

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                warn!("processor worker panicked during shutdown");
            }
        }

        // Settle tasks that were accepted but never reached a worker.
        let mut drained = 0u64;
        while let Ok(task) = self.inner.task_rx.try_recv() {
            task.nack();
            drained += 1;
        }
        if drained > 0 {
            self.inner
                .counters
                .nacked_tasks
                .fetch_add(drained, Ordering::Relaxed);
            debug!(drained, "nacked tasks left in processor queue at shutdown");
        }

        info!("parallel task processor stopped");
    }

    fn submit(&self, task: TaskRef<K>) -> AppResult<()> {
        let inner = &self.inner;
        if inner.status.load(Ordering::Acquire) == STATUS_STOPPED {
            return Err(SchedulerError::Closed.into());
        }

        let mut select = Select::new();
        let _send_index = select.send(&inner.task_tx);
        let shutdown_index = select.recv(&inner.shutdown_rx);
        let operation = select.select();
        if operation.index() == shutdown_index {
            let _ = operation.recv(&inner.shutdown_rx);
            return Err(SchedulerError::Closed.into());
        }
        operation
            .send(&inner.task_tx, task)
            .map_err(|_| SchedulerError::Closed)?;
        inner.counters.accepted_tasks.fetch_add(1, Ordering::Relaxed);

        // The send may race a concurrent stop whose drain already ran;
        // settle anything left behind so every accepted task is nacked.
        if inner.status.load(Ordering::Acquire) == STATUS_STOPPED {
            let mut drained = 0u64;
            while let Ok(task) = inner.task_rx.try_recv() {
                task.nack();
                drained += 1;
            }
            if drained > 0 {
                inner.counters.nacked_tasks.fetch_add(drained, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl<K: ChannelKey> Drop for ParallelTaskProcessor<K> {
    fn drop(&mut self) {
        // Signal shutdown but do not join; an explicit stop() is required
        // for drain semantics.
        if self.inner.status.swap(STATUS_STOPPED, Ordering::AcqRel) != STATUS_STOPPED {
            *self.inner.shutdown_tx.lock() = None;
            debug!("processor dropped without explicit stop, workers will be detached");
        }
    }
}

fn worker_loop<K: ChannelKey>(worker_id: usize, inner: &ProcessorInner<K>) {
    // Each worker owns a single-threaded runtime so task execution never
    // touches an outer async runtime.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(worker_id, error = %err, "failed to create worker runtime");
            return;
        }
    };

    debug!(worker_id, "processor worker started");
    loop {
        let mut select = Select::new();
        let _task_index = select.recv(&inner.task_rx);
        let shutdown_index = select.recv(&inner.shutdown_rx);
        let operation = select.select();
        if operation.index() == shutdown_index {
            let _ = operation.recv(&inner.shutdown_rx);
            break;
        }
        match operation.recv(&inner.task_rx) {
            Ok(task) => inner.execute_task(&runtime, &task),
            Err(_) => break,
        }
    }
    debug!(worker_id, "processor worker exiting");
}

impl<K: ChannelKey> ProcessorInner<K> {
    /// Run one task to completion: execute, retry under the policy, and
    /// settle with exactly one of ack/nack.
    fn execute_task(&self, runtime: &tokio::runtime::Runtime, task: &TaskRef<K>) {
        let mut retrier = Retrier::new(
            Arc::clone(&self.retry_policy),
            Arc::clone(&self.time_source),
        );
        loop {
            let outcome = catch_unwind(AssertUnwindSafe(|| runtime.block_on(task.execute())));
            match outcome {
                Ok(Ok(())) => {
                    task.ack();
                    self.counters.acked_tasks.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Ok(Err(err)) => match retrier.next_backoff() {
                    Some(delay) => {
                        debug!(error = %err, delay_ms = delay.as_millis() as u64, "task failed, retrying");
                        self.counters.retry_attempts.fetch_add(1, Ordering::Relaxed);
                        // Interruptible backoff: shutdown cuts the sleep
                        // short and abandons the task.
                        if self.shutdown_rx.recv_timeout(delay) != Err(RecvTimeoutError::Timeout) {
                            task.nack();
                            self.counters.nacked_tasks.fetch_add(1, Ordering::Relaxed);
                            return;
                        }
                    }
                    None => {
                        warn!(error = %err, "task failed and retries are exhausted, nacking");
                        task.nack();
                        self.counters.nacked_tasks.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                },
                Err(_) => {
                    error!("task execution panicked, nacking");
                    task.nack();
                    self.counters.nacked_tasks.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }
    }
}
