use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Global knobs that tune dispatch behaviour.
///
/// All fields carry defaults so embedders can supply a partial payload and
/// pick up new tuning knobs without configuration churn.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Global ceiling on simultaneously executing (target, plugin) pairs.
    /// One counting semaphore spans the whole task, not per-target.
    pub concurrent: usize,
    /// Randomized hold applied to a concurrency slot after a task finishes,
    /// smoothing bursty completion patterns.
    pub completion_jitter: JitterConfig,
    /// Capacity of the engine-result channel feeding the status stream.
    pub result_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrent: 20,
            completion_jitter: JitterConfig::default(),
            result_buffer: 256,
        }
    }
}

/// Bounds for the post-completion slot hold.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterConfig {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            min_ms: 200,
            max_ms: 600,
        }
    }
}

impl JitterConfig {
    /// Draws one hold duration from the configured range.
    pub fn sample(&self) -> Duration {
        let upper = self.max_ms.max(self.min_ms);
        let ms = rand::rng().random_range(self.min_ms..=upper);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.concurrent, 20);
        assert!(config.completion_jitter.min_ms <= config.completion_jitter.max_ms);
    }

    #[test]
    fn jitter_sample_stays_in_range() {
        let jitter = JitterConfig {
            min_ms: 10,
            max_ms: 20,
        };
        for _ in 0..50 {
            let d = jitter.sample();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
    }

    #[test]
    fn jitter_sample_tolerates_inverted_bounds() {
        let jitter = JitterConfig {
            min_ms: 30,
            max_ms: 5,
        };
        assert_eq!(jitter.sample(), Duration::from_millis(30));
    }
}
