//! Task and processor abstractions.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::AppResult;

/// Bounds required of a channel key: the discriminator that buckets tasks
/// into per-class queues. Typical instantiation is a small integer
/// priority.
pub trait ChannelKey: Clone + Ord + Hash + fmt::Debug + Send + Sync + 'static {}

/// Blanket implementation: any type meeting the requirements is a key.
impl<T> ChannelKey for T where T: Clone + Ord + Hash + fmt::Debug + Send + Sync + 'static {}

/// Completion state of a task, as seen through its ack/nack signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Neither ack nor nack has been observed yet.
    Pending,
    /// The task completed successfully.
    Acked,
    /// The task terminally failed or was abandoned.
    Nacked,
}

/// A schedulable unit of work carrying a priority class.
///
/// The scheduler is oblivious to everything about a task except its
/// priority and completion signals. `execute` is called by the processor,
/// never by the scheduler itself.
///
/// Contract: for every task accepted by a processor, exactly one of
/// [`ack`](PriorityTask::ack) or [`nack`](PriorityTask::nack) is
/// eventually called.
#[async_trait]
pub trait PriorityTask<K>: Send + Sync {
    /// The priority class of this task. Pure and cheap; called at most
    /// once per task by the scheduler.
    fn priority(&self) -> K;

    /// Run the task to completion. Called by the processor.
    async fn execute(&self) -> AppResult<()>;

    /// Signal successful completion.
    fn ack(&self);

    /// Signal terminal failure or abandonment.
    fn nack(&self);
}

/// Shared handle to a task.
///
/// Tasks travel through the scheduler as shared references so that a
/// dispatcher can still nack a task after handing a clone to a processor
/// that rejected it.
pub type TaskRef<K> = Arc<dyn PriorityTask<K>>;

/// Downstream worker pool consuming dispatched tasks.
///
/// An `Ok` return from [`submit`](Processor::submit) transfers task
/// ownership: the processor must then see the task through to exactly one
/// of ack/nack. An error return leaves completion signalling with the
/// caller. Implementations must accept concurrent `submit` calls.
pub trait Processor<K>: Send + Sync {
    /// Begin accepting and executing tasks.
    fn start(&self);

    /// Stop accepting tasks and settle all previously accepted ones.
    fn stop(&self);

    /// Hand a task to the processor. Blocking; unblocks on processor
    /// shutdown.
    fn submit(&self, task: TaskRef<K>) -> AppResult<()>;
}
