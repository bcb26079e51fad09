//! Reference-counted pool of weighted, bounded task channels.
//!
//! The pool maps a channel key (priority class) to a [`WeightedChannel`]:
//! a bounded crossbeam channel plus the per-round dispatch weight fixed at
//! creation. Holders acquire references through
//! [`ChannelPool::get_or_create_channel`]; the returned [`ChannelRef`]
//! guard releases the reference on drop. A channel whose reference count
//! reaches zero keeps its queued tasks and is only collected when the pool
//! itself is torn down.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::core::task::{ChannelKey, TaskRef};

/// A bounded task channel with an immutable dispatch weight and a
/// reference count.
///
/// Capacity and weight are fixed at creation. The reference count tracks
/// how many producers and dispatchers currently rely on the channel; it
/// never drives eviction while the scheduler is live.
pub struct WeightedChannel<K> {
    weight: usize,
    ref_count: AtomicUsize,
    tx: Sender<TaskRef<K>>,
    rx: Receiver<TaskRef<K>>,
}

impl<K: ChannelKey> WeightedChannel<K> {
    fn new(queue_size: usize, weight: usize) -> Self {
        let (tx, rx) = bounded(queue_size);
        Self {
            weight,
            ref_count: AtomicUsize::new(0),
            tx,
            rx,
        }
    }

    /// The per-round dispatch budget for this channel.
    #[must_use]
    pub fn weight(&self) -> usize {
        self.weight
    }

    /// Sending side of the task channel.
    #[must_use]
    pub fn sender(&self) -> &Sender<TaskRef<K>> {
        &self.tx
    }

    /// Receiving side of the task channel.
    #[must_use]
    pub fn receiver(&self) -> &Receiver<TaskRef<K>> {
        &self.rx
    }

    /// Number of tasks currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True when no tasks are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Current reference count.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    fn acquire(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self) {
        self.ref_count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// RAII reference to a pooled channel.
///
/// Dropping the guard releases the reference exactly once. While held,
/// the channel's send/receive ends may be used freely without the pool
/// lock.
pub struct ChannelRef<K: ChannelKey> {
    inner: Arc<WeightedChannel<K>>,
}

impl<K: ChannelKey> Deref for ChannelRef<K> {
    type Target = WeightedChannel<K>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<K: ChannelKey> Drop for ChannelRef<K> {
    fn drop(&mut self) {
        self.inner.release();
    }
}

/// Mapping from channel key to weighted channel.
///
/// Insert and lookup are serialized under a single mutex; channel
/// send/receive operations never happen under it.
pub struct ChannelPool<K: ChannelKey> {
    queue_size: usize,
    channels: Mutex<HashMap<K, Arc<WeightedChannel<K>>>>,
}

impl<K: ChannelKey> ChannelPool<K> {
    /// Create an empty pool whose channels will have `queue_size`
    /// capacity. A capacity of zero yields rendezvous channels.
    pub fn new(queue_size: usize) -> Self {
        Self {
            queue_size,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Return the channel for `key`, creating it with the supplied weight
    /// if absent, and acquire a reference to it.
    ///
    /// The weight is first-writer-wins: if the channel already exists the
    /// supplied weight is ignored. The boolean reports whether this call
    /// created the channel.
    pub fn get_or_create_channel(&self, key: K, weight: usize) -> (ChannelRef<K>, bool) {
        let mut channels = self.channels.lock();
        if let Some(existing) = channels.get(&key) {
            existing.acquire();
            return (
                ChannelRef {
                    inner: Arc::clone(existing),
                },
                false,
            );
        }

        let channel = Arc::new(WeightedChannel::new(self.queue_size, weight));
        channel.acquire();
        channels.insert(key, Arc::clone(&channel));
        (ChannelRef { inner: channel }, true)
    }

    /// Point-in-time snapshot of all channels, without acquiring
    /// references. Dispatchers use this to discover new channels and then
    /// acquire their own long-lived references.
    pub fn all_channels(&self) -> Vec<(K, Arc<WeightedChannel<K>>)> {
        let channels = self.channels.lock();
        channels
            .iter()
            .map(|(key, channel)| (key.clone(), Arc::clone(channel)))
            .collect()
    }

    /// Number of channels currently in the pool.
    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    /// True when the pool holds no channels.
    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    /// Total number of tasks queued across all channels.
    pub fn queued_tasks(&self) -> usize {
        let channels = self.channels.lock();
        channels.values().map(|channel| channel.len()).sum()
    }
}
