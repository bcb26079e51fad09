//! Core scheduling components: task abstractions, the refcounted channel
//! pool, the weighted round-robin dispatcher, and the parallel task
//! processor.

pub mod channel_pool;
pub mod error;
pub mod processor;
pub mod scheduler;
pub mod task;

pub use channel_pool::{ChannelPool, ChannelRef, WeightedChannel};
pub use error::{AppResult, SchedulerError};
pub use processor::{ParallelTaskProcessor, ProcessorStats};
pub use scheduler::{
    ChannelKeyToWeightFn, Scheduler, SchedulerOptions, SchedulerStats, TaskToChannelKeyFn,
    WeightedRoundRobinScheduler,
};
pub use task::{ChannelKey, PriorityTask, Processor, TaskRef, TaskState};
