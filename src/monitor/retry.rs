//! Bounded retry policy
//!
//! Thin mapping from [`RetrySettings`] to an exponential backoff schedule.
//! The policy is explicit configuration, not library defaults: every delay
//! and the total budget come from the settings, and randomization is off
//! so behavior is reproducible.

use crate::config::RetrySettings;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::Duration;

/// Retry schedule factory for one settings bundle
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    settings: RetrySettings,
}

impl RetryPolicy {
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    /// A fresh schedule; [`Backoff::next_backoff`] returns `None` once the
    /// elapsed budget is spent.
    pub fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.settings.initial_delay_ms))
            .with_multiplier(self.settings.multiplier)
            .with_max_interval(Duration::from_millis(self.settings.max_delay_ms))
            .with_max_elapsed_time(Some(Duration::from_millis(self.settings.max_elapsed_ms)))
            .with_randomization_factor(0.0)
            .build()
    }
}
