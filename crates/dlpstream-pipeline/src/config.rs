//! Pipeline configuration

use crate::dispatcher::{Backpressure, DispatcherConfig};
use crate::forwarder::ForwarderConfig;
use crate::retry::RetryPolicy;
use crate::sink::SinkConfig;
use dlpstream_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Batch assembly limits
    #[serde(default)]
    pub batch: BatchConfig,

    /// Per-source intake queue
    #[serde(default)]
    pub intake: IntakeConfig,

    /// Retry policy for classification calls
    #[serde(default = "RetryPolicy::classifier")]
    pub classifier_retry: RetryPolicy,

    /// Retry policy for sink writes
    #[serde(default = "RetryPolicy::sink")]
    pub sink_retry: RetryPolicy,

    /// Upper bound on one sink write attempt
    #[serde(default = "default_sink_timeout_ms")]
    pub sink_timeout_ms: u64,

    /// How often tailed files are checked for growth
    #[serde(default = "default_tail_poll_ms")]
    pub tail_poll_ms: u64,

    /// How often remote logs are polled
    #[serde(default = "default_remote_poll_ms")]
    pub remote_poll_ms: u64,

    /// How long shutdown waits for in-flight batches
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Where the delivery ledger is persisted; in memory when unset
    #[serde(default)]
    pub state_file: Option<PathBuf>,

    /// Output sinks; stdout when empty
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

impl PipelineConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.batch.max_items == 0 {
            return Err(Error::config("batch.max_items must be at least 1"));
        }
        if self.batch.max_bytes == 0 {
            return Err(Error::config("batch.max_bytes must be at least 1"));
        }
        if self.batch.flush_interval_ms == 0 {
            return Err(Error::config("batch.flush_interval_ms must be positive"));
        }
        if self.intake.capacity == 0 {
            return Err(Error::config("intake.capacity must be at least 1"));
        }
        for (name, policy) in [
            ("classifier_retry", &self.classifier_retry),
            ("sink_retry", &self.sink_retry),
        ] {
            if policy.max_attempts == 0 {
                return Err(Error::config(format!("{}.max_attempts must be at least 1", name)));
            }
            if policy.multiplier.is_nan() || policy.multiplier < 1.0 {
                return Err(Error::config(format!("{}.multiplier must be >= 1", name)));
            }
        }
        for (name, value) in [
            ("sink_timeout_ms", self.sink_timeout_ms),
            ("tail_poll_ms", self.tail_poll_ms),
            ("remote_poll_ms", self.remote_poll_ms),
        ] {
            if value == 0 {
                return Err(Error::config(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_batch_items: self.batch.max_items,
            max_batch_bytes: self.batch.max_bytes,
            flush_interval: Duration::from_millis(self.batch.flush_interval_ms),
            intake_capacity: self.intake.capacity,
            backpressure: self.intake.backpressure,
            retry: self.classifier_retry.clone(),
        }
    }

    pub fn forwarder_config(&self) -> ForwarderConfig {
        ForwarderConfig {
            retry: self.sink_retry.clone(),
            attempt_timeout: Duration::from_millis(self.sink_timeout_ms),
        }
    }

    pub fn tail_poll(&self) -> Duration {
        Duration::from_millis(self.tail_poll_ms)
    }

    pub fn remote_poll(&self) -> Duration {
        Duration::from_millis(self.remote_poll_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            intake: IntakeConfig::default(),
            classifier_retry: RetryPolicy::classifier(),
            sink_retry: RetryPolicy::sink(),
            sink_timeout_ms: default_sink_timeout_ms(),
            tail_poll_ms: default_tail_poll_ms(),
            remote_poll_ms: default_remote_poll_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            state_file: None,
            sinks: Vec::new(),
        }
    }
}

/// Batch assembly limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Age of the oldest buffered item that forces a flush
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            max_bytes: default_max_bytes(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

/// Per-source intake queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeConfig {
    #[serde(default = "default_intake_capacity")]
    pub capacity: usize,

    #[serde(default)]
    pub backpressure: Backpressure,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            capacity: default_intake_capacity(),
            backpressure: Backpressure::default(),
        }
    }
}

fn default_max_items() -> usize {
    50
}

fn default_max_bytes() -> usize {
    512 * 1024
}

fn default_flush_interval_ms() -> u64 {
    2_000
}

fn default_intake_capacity() -> usize {
    256
}

fn default_sink_timeout_ms() -> u64 {
    5_000
}

fn default_tail_poll_ms() -> u64 {
    250
}

fn default_remote_poll_ms() -> u64 {
    5_000
}

fn default_drain_timeout_ms() -> u64 {
    10_000
}
