//! Exponential backoff with jitter and a retry budget.

use std::time::Duration;

use rand::Rng;

/// Default minimum delay between retries.
const DEFAULT_MIN_PERIOD: Duration = Duration::from_millis(500);

/// Default maximum delay between retries.
const DEFAULT_MAX_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Default number of attempts before giving up.
const DEFAULT_MAX_RETRIES: u32 = 10;

/// Settings for [`Backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub min_period: Duration,

    /// Upper bound for any single delay
    pub max_period: Duration,

    /// Number of attempts allowed; 0 means unlimited
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_period: DEFAULT_MIN_PERIOD,
            max_period: DEFAULT_MAX_PERIOD,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Tracks retries for a single operation.
///
/// ```no_run
/// # async fn attempt() -> bool { true }
/// use loki_client::backoff::{Backoff, BackoffConfig};
///
/// # async fn run() {
/// let mut backoff = Backoff::new(BackoffConfig::default());
/// while backoff.ongoing() {
///     if attempt().await {
///         break;
///     }
///     backoff.wait().await;
/// }
/// # }
/// ```
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    num_retries: u32,
    next_delay_min: Duration,
    next_delay_max: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            num_retries: 0,
            next_delay_min: config.min_period,
            next_delay_max: config.min_period.saturating_mul(2).min(config.max_period),
        }
    }

    /// Whether another attempt may be made.
    pub fn ongoing(&self) -> bool {
        self.config.max_retries == 0 || self.num_retries < self.config.max_retries
    }

    /// Number of waits performed so far.
    pub fn num_retries(&self) -> u32 {
        self.num_retries
    }

    /// Count a retry and return how long to wait before the next attempt.
    ///
    /// The delay is drawn from `[min, 2 * min)` and both bounds double on each
    /// call until they reach the configured maximum.
    pub fn next_delay(&mut self) -> Duration {
        self.num_retries += 1;

        let delay = if self.next_delay_min >= self.next_delay_max {
            self.next_delay_min
        } else {
            rand::thread_rng().gen_range(self.next_delay_min..self.next_delay_max)
        };

        self.next_delay_min = self
            .next_delay_min
            .saturating_mul(2)
            .min(self.config.max_period);
        self.next_delay_max = self
            .next_delay_max
            .saturating_mul(2)
            .min(self.config.max_period);

        delay
    }

    /// Count a retry and sleep for the next delay if the budget is not spent.
    pub async fn wait(&mut self) {
        let delay = self.next_delay();
        if self.ongoing() {
            tokio::time::sleep(delay).await;
        }
    }
}
