use crate::config::BackoffSettings;
use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use std::time::Duration;

/// Retry cadence for access-token requests. Wraps a [`backon`] exponential
/// policy into an entry that tracks consecutive failures and resets on any
/// fully successful fetch.
///
/// A delay is only ever computed from [`record_failure`](Self::record_failure),
/// so the first request after a success always goes out immediately.
pub struct RetryBackoff {
    builder: ExponentialBuilder,
    schedule: ExponentialBackoff,
    max_delay: Duration,
    failures: u32,
}

impl RetryBackoff {
    pub fn new(settings: &BackoffSettings) -> Self {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(settings.initial_delay_ms))
            .with_max_delay(Duration::from_millis(settings.max_delay_ms))
            .with_factor(settings.factor)
            .with_max_times(usize::MAX);
        if settings.jitter {
            builder = builder.with_jitter();
        }
        Self {
            builder,
            schedule: builder.build(),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            failures: 0,
        }
    }

    /// Records one more consecutive failure and returns the delay to wait
    /// before the next attempt, bounded by the policy ceiling.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.schedule.next().unwrap_or(self.max_delay)
    }

    /// Restores the schedule to its initial value. Called on every fully
    /// successful credential fetch.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.schedule = self.builder.build();
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
