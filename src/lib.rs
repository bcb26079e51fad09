//! # Taskwheel
//!
//! A weighted round-robin priority task scheduler for workflow
//! orchestration services.
//!
//! Producers submit heterogeneous tasks carrying a priority class; the
//! scheduler buckets them into bounded per-class channels and a set of
//! dispatcher workers drains the channels in weighted round-robin order,
//! handing tasks to a downstream [`Processor`](crate::core::Processor).
//! Steady-state throughput across classes follows the configured weights,
//! a backlogged class cannot starve the others, and a saturated class
//! cannot monopolize the worker pool.
//!
//! ## Modules
//!
//! - [`core`](crate::core) - the scheduler, channel pool, and parallel
//!   task processor
//! - [`backoff`](crate::backoff) - exponential and multi-phase retry
//!   policies
//! - [`config`](crate::config) - serde-backed configuration with
//!   validation
//! - [`util`](crate::util) - clock abstraction and telemetry helpers
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use taskwheel::backoff::ExponentialRetryPolicy;
//! use taskwheel::config::{ProcessorConfig, SchedulerConfig};
//! use taskwheel::core::{
//!     ParallelTaskProcessor, Scheduler, SchedulerOptions, WeightedRoundRobinScheduler,
//! };
//! use taskwheel::util::SystemTimeSource;
//!
//! let time_source = Arc::new(SystemTimeSource);
//! let processor = Arc::new(ParallelTaskProcessor::new(
//!     ProcessorConfig::new().with_worker_count(4),
//!     Arc::new(ExponentialRetryPolicy::new(Duration::from_millis(50))),
//!     time_source.clone(),
//! )?);
//!
//! let scheduler = WeightedRoundRobinScheduler::new(
//!     SchedulerOptions::new(
//!         SchedulerConfig::new().with_queue_size(1000).with_dispatcher_count(3),
//!         Arc::new(|task| task.priority()),
//!         Arc::new(|priority: &i32| match priority { 0 => 3, 1 => 2, _ => 1 }),
//!     ),
//!     processor.clone(),
//!     time_source,
//! )?;
//!
//! processor.start();
//! scheduler.start();
//! scheduler.submit(my_task)?;
//! // ...
//! scheduler.stop();
//! processor.stop();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod config;
pub mod core;
pub mod util;

// Re-export main types for convenience
pub use crate::backoff::{ExponentialRetryPolicy, MultiPhasesRetryPolicy, Retrier, RetryPolicy};
pub use crate::core::{
    AppResult, ChannelKey, ParallelTaskProcessor, PriorityTask, Processor, Scheduler,
    SchedulerError, SchedulerOptions, TaskRef, WeightedRoundRobinScheduler,
};
pub use crate::util::{SystemTimeSource, TimeSource};
