//! Scheduler and processor configuration structures.

use serde::{Deserialize, Serialize};

/// Default per-priority channel capacity.
fn default_queue_size() -> usize {
    1000
}

/// Default number of dispatcher workers (uses CPU count).
fn default_dispatcher_count() -> usize {
    num_cpus::get()
}

/// Default number of processor workers (uses CPU count).
fn default_worker_count() -> usize {
    num_cpus::get()
}

/// Configuration for the weighted round-robin scheduler.
///
/// # Example
///
/// ```rust
/// use taskwheel::config::SchedulerConfig;
///
/// let config = SchedulerConfig::new()
///     .with_queue_size(500)
///     .with_dispatcher_count(3);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Bounded capacity of each per-priority channel. Zero yields
    /// rendezvous channels: submissions block until a dispatcher is
    /// ready to receive.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Number of parallel dispatcher workers.
    ///
    /// More workers trade per-priority FIFO ordering at the processor for
    /// throughput; callers that need strict per-priority ordering must
    /// use a single dispatcher.
    #[serde(default = "default_dispatcher_count")]
    pub dispatcher_count: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            dispatcher_count: default_dispatcher_count(),
        }
    }
}

impl SchedulerConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-priority channel capacity.
    #[must_use]
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Set the number of dispatcher workers.
    #[must_use]
    pub fn with_dispatcher_count(mut self, dispatcher_count: usize) -> Self {
        self.dispatcher_count = dispatcher_count;
        self
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.dispatcher_count == 0 {
            return Err("dispatcher_count must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse a configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let config: SchedulerConfig =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        config.validate()?;
        Ok(config)
    }
}

/// Configuration for the parallel task processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Bounded capacity of the processor's task queue.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Number of worker threads executing tasks.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            worker_count: default_worker_count(),
        }
    }
}

impl ProcessorConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the task queue capacity.
    #[must_use]
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_defaults() {
        let config = SchedulerConfig::new();
        assert_eq!(config.queue_size, 1000);
        assert!(config.dispatcher_count >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scheduler_config_rejects_zero_dispatchers() {
        let config = SchedulerConfig::new().with_dispatcher_count(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scheduler_config_allows_zero_queue_size() {
        // Rendezvous channels are a legal configuration.
        let config = SchedulerConfig::new().with_queue_size(0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scheduler_config_from_json() {
        let config =
            SchedulerConfig::from_json_str(r#"{"queue_size": 42, "dispatcher_count": 2}"#)
                .unwrap();
        assert_eq!(config.queue_size, 42);
        assert_eq!(config.dispatcher_count, 2);

        // Missing fields fall back to defaults.
        let config = SchedulerConfig::from_json_str("{}").unwrap();
        assert_eq!(config.queue_size, 1000);
    }

    #[test]
    fn test_scheduler_config_from_json_rejects_invalid() {
        assert!(SchedulerConfig::from_json_str(r#"{"dispatcher_count": 0}"#).is_err());
        assert!(SchedulerConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_processor_config_validation() {
        assert!(ProcessorConfig::new().validate().is_ok());
        assert!(ProcessorConfig::new()
            .with_worker_count(0)
            .validate()
            .is_err());
    }
}
