//! Engine timing configuration.
//!
//! The four durations bound every long-lived operation the engine runs:
//! stream idleness, per-batch application, subscription refresh and
//! subscription lifetime. All are required and must be non-zero; a zero
//! duration is a startup-fatal misconfiguration, not a runtime default.

use std::time::Duration;
use thiserror::Error;

/// A zero or missing duration in [`StreamConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0} must be a non-zero duration")]
pub struct ConfigError(&'static str);

/// Timing knobs for streaming ingestion and progress subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Terminate an event stream that receives no batch within this window.
    pub idle_timeout: Duration,
    /// Deadline for applying a single batch; distinct from the idle window.
    pub batch_timeout: Duration,
    /// Interval between subscription snapshots.
    pub subscribe_interval: Duration,
    /// Maximum total lifetime of one subscription.
    pub subscribe_max_duration: Duration,
}

impl StreamConfig {
    /// Validate that every duration is non-zero.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] naming the first offending field.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout.is_zero() {
            return Err(ConfigError("stream idle timeout"));
        }
        if self.batch_timeout.is_zero() {
            return Err(ConfigError("stream batch timeout"));
        }
        if self.subscribe_interval.is_zero() {
            return Err(ConfigError("subscribe interval"));
        }
        if self.subscribe_max_duration.is_zero() {
            return Err(ConfigError("subscribe max duration"));
        }
        Ok(())
    }
}
