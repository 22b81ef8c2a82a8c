//! Configuration for the sync engine.

use std::time::Duration;
use storefront_sync_protocol::{EntityType, StreamSpec};

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Reconnection behavior.
    pub reconnect: ReconnectConfig,
    /// Collection-level streams opened by `initialize`.
    pub baseline_streams: Vec<StreamSpec>,
}

impl SyncConfig {
    /// Creates a configuration with one baseline stream per entity type.
    pub fn new() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            baseline_streams: EntityType::ALL
                .into_iter()
                .map(StreamSpec::collection)
                .collect(),
        }
    }

    /// Sets the reconnection configuration.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Replaces the baseline streams.
    pub fn with_baseline_streams(mut self, streams: Vec<StreamSpec>) -> Self {
        self.baseline_streams = streams;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for reconnection backoff.
///
/// Attempt `k` (1-indexed) waits `base_delay * 2^(k-1)`. Without a
/// `max_delay` or jitter this reproduces the plain doubling sequence
/// (1, 2, 4, 8, 16 for a one-second base).
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts per session.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Option<Duration>,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
}

impl ReconnectConfig {
    /// Creates a configuration with the given attempt budget.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_secs(1),
            max_delay: None,
            add_jitter: false,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Caps every delay at `delay`.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Calculates the delay before attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 2u32.saturating_pow(attempt - 1);
        let mut delay = self.base_delay.saturating_mul(factor);

        if let Some(max) = self.max_delay {
            delay = delay.min(max);
        }

        if self.add_jitter {
            let jitter = delay.mul_f64(0.25 * rand::random::<f64>());
            delay.saturating_add(jitter)
        } else {
            delay
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::new(5)
    }
}
