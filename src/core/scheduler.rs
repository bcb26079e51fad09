//! Weighted round-robin task scheduler.
//!
//! Producers submit tasks through [`Scheduler::submit`] or
//! [`Scheduler::try_submit`]; tasks are bucketed by channel key into the
//! pool and a set of dispatcher worker threads drains the channels in
//! weighted round-robin order, handing each task to the downstream
//! [`Processor`]. Per round a dispatcher takes at most `weight` tasks from
//! each channel, which yields proportional fair-share across priority
//! classes in steady state while a backlogged class can never starve the
//! others.
//!
//! # Ordering
//!
//! FIFO holds per channel from submit to dispatch. With more than one
//! dispatcher, order at the processor is approximate even within a
//! channel; callers that need strict per-priority ordering must configure
//! a single dispatcher.
//!
//! # Shutdown
//!
//! `stop` closes the shutdown signal and waits for dispatchers to exit
//! after their current handoff. Tasks still sitting in channels are left
//! in place; the scheduler makes no durability claim.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Select, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::core::channel_pool::{ChannelPool, ChannelRef};
use crate::core::task::{ChannelKey, PriorityTask, Processor, TaskRef};
use crate::core::SchedulerError;
use crate::util::TimeSource;

const STATUS_INITIAL: u8 = 0;
const STATUS_RUNNING: u8 = 1;
const STATUS_STOPPED: u8 = 2;

/// Maps a task to the key of the channel it should be buffered on. Pure
/// and deterministic; called at most once per submission.
pub type TaskToChannelKeyFn<K> = dyn Fn(&dyn PriorityTask<K>) -> K + Send + Sync;

/// Maps a channel key to the per-round dispatch weight. Called once per
/// channel creation; the weight is immutable afterwards.
pub type ChannelKeyToWeightFn<K> = dyn Fn(&K) -> usize + Send + Sync;

/// A task scheduler dispatching to a downstream processor.
pub trait Scheduler<K>: Send + Sync {
    /// Begin dispatching. Idempotent.
    fn start(&self);

    /// Stop dispatching and wait for the dispatcher workers to exit.
    /// Idempotent.
    fn stop(&self);

    /// Enqueue a task, blocking while its channel is full.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Closed`] once the scheduler has stopped,
    /// including when the stop arrives while blocked on a full channel.
    fn submit(&self, task: TaskRef<K>) -> Result<(), SchedulerError>;

    /// Enqueue a task without blocking. Returns `Ok(false)` when the
    /// channel is full.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Closed`] once the scheduler has stopped.
    fn try_submit(&self, task: TaskRef<K>) -> Result<bool, SchedulerError>;
}

/// Options for [`WeightedRoundRobinScheduler`].
pub struct SchedulerOptions<K: ChannelKey> {
    /// Queue capacity and dispatcher parallelism.
    pub config: SchedulerConfig,
    /// Task classification function.
    pub task_to_channel_key: Arc<TaskToChannelKeyFn<K>>,
    /// Weight configuration function.
    pub channel_key_to_weight: Arc<ChannelKeyToWeightFn<K>>,
}

impl<K: ChannelKey> SchedulerOptions<K> {
    /// Bundle scheduler options.
    pub fn new(
        config: SchedulerConfig,
        task_to_channel_key: Arc<TaskToChannelKeyFn<K>>,
        channel_key_to_weight: Arc<ChannelKeyToWeightFn<K>>,
    ) -> Self {
        Self {
            config,
            task_to_channel_key,
            channel_key_to_weight,
        }
    }
}

/// Internal counters for scheduler statistics (lock-free).
#[derive(Debug, Default)]
struct SchedulerCounters {
    submitted_tasks: AtomicU64,
    rejected_tasks: AtomicU64,
    dispatched_tasks: AtomicU64,
    nacked_tasks: AtomicU64,
    dispatch_latency_ns: AtomicU64,
}

/// Point-in-time scheduler statistics.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Total submissions attempted (submit and try_submit).
    pub submitted_tasks: u64,
    /// Non-blocking submissions rejected because the channel was full.
    pub rejected_tasks: u64,
    /// Tasks successfully handed to the processor.
    pub dispatched_tasks: u64,
    /// Tasks nacked because the processor rejected them.
    pub nacked_tasks: u64,
    /// Mean latency of the processor handoff.
    pub avg_dispatch_latency: Duration,
    /// Tasks currently queued across all channels.
    pub queued_tasks: usize,
    /// Number of priority channels created so far.
    pub channel_count: usize,
}

/// Weighted round-robin task scheduler over a refcounted channel pool.
///
/// See the [module docs](self) for the dispatch and shutdown discipline.
pub struct WeightedRoundRobinScheduler<K: ChannelKey> {
    inner: Arc<Inner<K>>,
    dispatchers: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner<K: ChannelKey> {
    options: SchedulerOptions<K>,
    pool: ChannelPool<K>,
    processor: Arc<dyn Processor<K>>,
    time_source: Arc<dyn TimeSource>,
    counters: SchedulerCounters,
    status: AtomicU8,
    /// Dropping the sender closes the shutdown signal for every select
    /// that watches the receiver.
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    /// Nudged when a new channel is created so an idle dispatcher picks
    /// it up without waiting for traffic on the channels it already
    /// knows.
    channel_added_tx: Sender<()>,
    channel_added_rx: Receiver<()>,
}

/// A channel a dispatcher holds a long-lived reference to, in its local
/// key-sorted working set.
struct LocalChannel<K: ChannelKey> {
    key: K,
    channel: ChannelRef<K>,
}

impl<K: ChannelKey> WeightedRoundRobinScheduler<K> {
    /// Create a scheduler dispatching to `processor`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidOptions`] when the configuration fails
    /// validation.
    pub fn new(
        options: SchedulerOptions<K>,
        processor: Arc<dyn Processor<K>>,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<Self, SchedulerError> {
        options
            .config
            .validate()
            .map_err(SchedulerError::InvalidOptions)?;

        let pool = ChannelPool::new(options.config.queue_size);
        let (shutdown_tx, shutdown_rx) = bounded(0);
        let (channel_added_tx, channel_added_rx) = bounded(1);

        Ok(Self {
            inner: Arc::new(Inner {
                options,
                pool,
                processor,
                time_source,
                counters: SchedulerCounters::default(),
                status: AtomicU8::new(STATUS_INITIAL),
                shutdown_tx: Mutex::new(Some(shutdown_tx)),
                shutdown_rx,
                channel_added_tx,
                channel_added_rx,
            }),
            dispatchers: Mutex::new(Vec::new()),
        })
    }

    /// Get current scheduler statistics.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let counters = &self.inner.counters;
        let dispatched = counters.dispatched_tasks.load(Ordering::Relaxed);
        let latency_ns = counters.dispatch_latency_ns.load(Ordering::Relaxed);
        SchedulerStats {
            submitted_tasks: counters.submitted_tasks.load(Ordering::Relaxed),
            rejected_tasks: counters.rejected_tasks.load(Ordering::Relaxed),
            dispatched_tasks: dispatched,
            nacked_tasks: counters.nacked_tasks.load(Ordering::Relaxed),
            avg_dispatch_latency: if dispatched == 0 {
                Duration::ZERO
            } else {
                Duration::from_nanos(latency_ns / dispatched)
            },
            queued_tasks: self.inner.pool.queued_tasks(),
            channel_count: self.inner.pool.len(),
        }
    }
}

impl<K: ChannelKey> Scheduler<K> for WeightedRoundRobinScheduler<K> {
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

        let dispatcher_count = self.inner.options.config.dispatcher_count;
        let mut dispatchers = self.dispatchers.lock();
        for dispatcher_id in 0..dispatcher_count {
            let inner = Arc::clone(&self.inner);
            let handle = thread::Builder::new()
                .name(format!("wrr-dispatcher-{dispatcher_id}"))
                .spawn(move || inner.dispatcher_loop(dispatcher_id))
                .expect("failed to spawn dispatcher thread");
            dispatchers.push(handle);
        }

        info!(
            dispatcher_count,
            queue_size = self.inner.options.config.queue_size,
            "weighted round-robin task scheduler started"
        );
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

        // Close the shutdown signal; every select watching it wakes.
        *self.inner.shutdown_tx.lock() = None;

        let mut dispatchers = self.dispatchers.lock();
        for handle in dispatchers.drain(..) {
            if handle.join().is_err() {
                warn!("dispatcher thread panicked during shutdown");
            }
        }

        info!("weighted round-robin task scheduler stopped");
    }

    fn submit(&self, task: TaskRef<K>) -> Result<(), SchedulerError> {
        let inner = &self.inner;
        inner.counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);
        if inner.is_stopped() {
            return Err(SchedulerError::Closed);
        }

        let channel = inner.acquire_channel(&task);

        let mut select = Select::new();
        let _send_index = select.send(channel.sender());
        let shutdown_index = select.recv(&inner.shutdown_rx);
        let operation = select.select();
        if operation.index() == shutdown_index {
            let _ = operation.recv(&inner.shutdown_rx);
            return Err(SchedulerError::Closed);
        }
        operation
            .send(channel.sender(), task)
            .map_err(|_| SchedulerError::Closed)
    }

    fn try_submit(&self, task: TaskRef<K>) -> Result<bool, SchedulerError> {
        let inner = &self.inner;
        inner.counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);
        if inner.is_stopped() {
            return Err(SchedulerError::Closed);
        }

        let channel = inner.acquire_channel(&task);
        match channel.sender().try_send(task) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                inner.counters.rejected_tasks.fetch_add(1, Ordering::Relaxed);
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Err(SchedulerError::Closed),
        }
    }
}

impl<K: ChannelKey> Drop for WeightedRoundRobinScheduler<K> {
    fn drop(&mut self) {
        // Signal shutdown but do not join; an explicit stop() is required
        // for a synchronous drain.
        if self.inner.status.swap(STATUS_STOPPED, Ordering::AcqRel) != STATUS_STOPPED {
            *self.inner.shutdown_tx.lock() = None;
            debug!("scheduler dropped without explicit stop, dispatchers will be detached");
        }
    }
}

impl<K: ChannelKey> Inner<K> {
    fn is_stopped(&self) -> bool {
        self.status.load(Ordering::Acquire) == STATUS_STOPPED
    }

    fn shutdown_fired(&self) -> bool {
        matches!(self.shutdown_rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Classify the task and acquire a reference to its channel, creating
    /// the channel on first use.
    fn acquire_channel(&self, task: &TaskRef<K>) -> ChannelRef<K> {
        let key = (self.options.task_to_channel_key)(task.as_ref());
        let mut weight = (self.options.channel_key_to_weight)(&key);
        if weight == 0 {
            warn!(key = ?key, "channel weight of zero clamped to 1");
            weight = 1;
        }

        let (channel, created) = self.pool.get_or_create_channel(key.clone(), weight);
        if created {
            debug!(key = ?key, weight, "created task channel");
            // Wake an idle dispatcher so the new channel joins a working
            // set promptly. Full buffer means a wake is already pending.
            let _ = self.channel_added_tx.try_send(());
        }
        channel
    }

    fn dispatcher_loop(&self, dispatcher_id: usize) {
        debug!(dispatcher_id, "dispatcher started");
        let mut channels: Vec<LocalChannel<K>> = Vec::new();
        loop {
            if self.shutdown_fired() {
                break;
            }
            self.refresh_channels(&mut channels);
            if self.dispatch_round(&channels) == 0 && !self.wait_for_work(&channels) {
                break;
            }
        }
        debug!(dispatcher_id, "dispatcher exiting");
        // Dropping the working set releases the channel references.
    }

    /// Acquire references for channels this dispatcher has not observed
    /// yet, keeping the working set sorted by key for a stable round
    /// order.
    fn refresh_channels(&self, channels: &mut Vec<LocalChannel<K>>) {
        // The pool never shrinks while the scheduler is live.
        if self.pool.len() == channels.len() {
            return;
        }
        for (key, channel) in self.pool.all_channels() {
            if let Err(position) = channels.binary_search_by(|local| local.key.cmp(&key)) {
                let (reference, _) = self.pool.get_or_create_channel(key.clone(), channel.weight());
                channels.insert(
                    position,
                    LocalChannel {
                        key,
                        channel: reference,
                    },
                );
            }
        }
    }

    /// One round: visit every known channel in key order, taking up to
    /// `weight` tasks from each. Returns the number of tasks handed off.
    fn dispatch_round(&self, channels: &[LocalChannel<K>]) -> usize {
        let mut dispatched = 0;
        for local in channels {
            for _ in 0..local.channel.weight() {
                if self.shutdown_fired() {
                    return dispatched;
                }
                match local.channel.receiver().try_recv() {
                    Ok(task) => {
                        self.handoff(&local.key, task);
                        dispatched += 1;
                    }
                    Err(_) => break,
                }
            }
        }
        dispatched
    }

    /// Block until any known channel has a task, a new channel is
    /// created, or shutdown is requested. Returns false on shutdown.
    fn wait_for_work(&self, channels: &[LocalChannel<K>]) -> bool {
        let mut select = Select::new();
        for local in channels {
            select.recv(local.channel.receiver());
        }
        let added_index = select.recv(&self.channel_added_rx);
        let shutdown_index = select.recv(&self.shutdown_rx);

        let operation = select.select();
        let index = operation.index();
        if index == shutdown_index {
            let _ = operation.recv(&self.shutdown_rx);
            return false;
        }
        if index == added_index {
            let _ = operation.recv(&self.channel_added_rx);
            return true;
        }

        let local = &channels[index];
        if let Ok(task) = operation.recv(local.channel.receiver()) {
            self.handoff(&local.key, task);
        }
        true
    }

    /// Hand one task to the processor. A rejection nacks the task; the
    /// scheduler never re-enqueues. Panics are contained here so a
    /// misbehaving task or processor cannot take the dispatcher down.
    fn handoff(&self, key: &K, task: TaskRef<K>) {
        let started = self.time_source.now();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            match self.processor.submit(Arc::clone(&task)) {
                Ok(()) => true,
                Err(err) => {
                    warn!(key = ?key, error = %err, "processor rejected task, nacking");
                    task.nack();
                    false
                }
            }
        }));
        match outcome {
            Ok(true) => {
                self.counters.dispatched_tasks.fetch_add(1, Ordering::Relaxed);
                let latency = self.time_source.now().saturating_duration_since(started);
                self.counters
                    .dispatch_latency_ns
                    .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
            }
            Ok(false) => {
                self.counters.nacked_tasks.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                error!(key = ?key, "panic during task handoff");
            }
        }
    }
}
