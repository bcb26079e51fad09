//! Configuration models for the scheduler and processor.

pub mod scheduler;

pub use scheduler::{ProcessorConfig, SchedulerConfig};
