//! Test fixtures.

use std::time::Duration;
use versync_engine::{EngineConfig, RetryConfig};
use versync_protocol::{ChangeSet, LineEdit};

/// Builds a change set of update edits from `(line, content)` pairs.
pub fn edits(pairs: &[(u32, &str)]) -> ChangeSet {
    pairs
        .iter()
        .map(|(line, content)| LineEdit::update(*line, *content))
        .collect()
}

/// Builds a change set of insert edits from `(line, content)` pairs.
pub fn inserts(pairs: &[(u32, &str)]) -> ChangeSet {
    pairs
        .iter()
        .map(|(line, content)| LineEdit::insert(*line, *content))
        .collect()
}

/// Engine config with short timeouts and jitter-free retries.
pub fn fast_config() -> EngineConfig {
    EngineConfig::new()
        .with_store_timeout(Duration::from_millis(200))
        .with_insight_timeout(Duration::from_millis(50))
        .with_lane_idle_timeout(Duration::from_millis(100))
        .with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(5))
                .with_max_delay(Duration::from_millis(20))
                .with_jitter(false),
        )
}
