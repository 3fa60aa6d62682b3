//! Configuration for the sync engine.

use crate::error::SyncError;
use std::time::Duration;

/// Configuration for the sync service and its dispatcher.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of the task queue, and the bound on tasks in flight.
    pub queue_capacity: usize,
    /// Maximum number of files processed concurrently.
    pub max_parallel_files: usize,
    /// Time budget of every store call.
    pub store_timeout: Duration,
    /// Time budget of a content-insight request.
    pub insight_timeout: Duration,
    /// How long a per-file lane waits for work before exiting.
    pub lane_idle_timeout: Duration,
    /// How often a task re-runs detection after losing an append race.
    pub max_stale_reruns: u32,
    /// Capacity of the outgoing event buffer.
    pub event_buffer: usize,
    /// Maximum number of edits in one change set.
    pub max_changes: usize,
    /// Retry configuration for transient store failures and lost races.
    pub retry: RetryConfig,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            queue_capacity: 1024,
            max_parallel_files: 8,
            store_timeout: Duration::from_secs(3),
            insight_timeout: Duration::from_millis(500),
            lane_idle_timeout: Duration::from_secs(30),
            max_stale_reruns: 8,
            event_buffer: 256,
            max_changes: 10_000,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Sets the number of files processed concurrently.
    pub fn with_max_parallel_files(mut self, files: usize) -> Self {
        self.max_parallel_files = files.max(1);
        self
    }

    /// Sets the store call timeout.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Sets the content-insight timeout.
    pub fn with_insight_timeout(mut self, timeout: Duration) -> Self {
        self.insight_timeout = timeout;
        self
    }

    /// Sets the lane idle timeout.
    pub fn with_lane_idle_timeout(mut self, timeout: Duration) -> Self {
        self.lane_idle_timeout = timeout;
        self
    }

    /// Sets the stale-version re-run limit.
    pub fn with_max_stale_reruns(mut self, reruns: u32) -> Self {
        self.max_stale_reruns = reruns;
        self
    }

    /// Sets the event buffer capacity.
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Sets the maximum change-set size.
    pub fn with_max_changes(mut self, max: usize) -> Self {
        self.max_changes = max;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// How a task is retried after a retryable failure.
///
/// Unavailable stores get exponential backoff. Timeouts start one step
/// further along the curve. A task that ran out of stale re-runs pauses
/// for the flat `contention_delay` before it is tried again.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
    /// Pause after a task kept losing append races.
    pub contention_delay: Duration,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            add_jitter: true,
            contention_delay: Duration::from_millis(20),
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
            contention_delay: Duration::ZERO,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Sets the pause after a task kept losing append races.
    pub fn with_contention_delay(mut self, delay: Duration) -> Self {
        self.contention_delay = delay;
        self
    }

    /// Calculates the pause before retry `attempt` of a task that failed with `err`.
    pub fn delay_for(&self, attempt: u32, err: &SyncError) -> Duration {
        match err {
            SyncError::StaleVersion { .. } if attempt > 0 => {
                let delay = self.contention_delay.min(self.max_delay);
                self.jittered(delay.as_secs_f64())
            }
            SyncError::StoreTimeout(_) => self.delay_for_attempt(attempt.saturating_add(1)),
            _ => self.delay_for_attempt(attempt),
        }
    }

    /// Calculates the delay before retry `attempt` (0 means the first try).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        self.jittered(base_delay.min(self.max_delay.as_secs_f64()))
    }

    fn jittered(&self, delay_secs: f64) -> Duration {
        if self.add_jitter {
            // Up to 25% jitter.
            let jitter = delay_secs * 0.25 * time_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Pseudo-random factor in [0, 1) taken from the clock.
fn time_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}
