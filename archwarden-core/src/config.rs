use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Global knobs that tune a scan.
///
/// All fields carry defaults so a partial TOML/JSON payload is enough to
/// override a single setting.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Number of sub-ranges scanned in parallel.
    pub concurrency: usize,
    /// Ledgers between checkpoints. 64 on every public network.
    pub checkpoint_frequency: u32,
    /// Hash worker count. `None` sizes the pool from the host's cores.
    pub hash_workers: Option<usize>,
    /// Per-request timeout for archive fetches.
    pub request_timeout_ms: u64,
    /// Retry/backoff policy for transient fetch failures.
    pub retry: RetryConfig,
    /// Download and hash every bucket referenced by a checkpoint manifest.
    /// Buckets are large; turning this off still verifies the bucket list hash.
    pub verify_buckets: bool,
    pub slow_archive: SlowArchiveConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            concurrency: 6,
            checkpoint_frequency: 64,
            hash_workers: None,
            request_timeout_ms: 30_000,
            retry: RetryConfig::default(),
            verify_buckets: true,
            slow_archive: SlowArchiveConfig::default(),
        }
    }
}

impl ScannerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Worker count for the hash pool: the override if set, otherwise one
    /// less than the logical core count, never below one.
    pub fn hash_worker_count(&self) -> usize {
        self.hash_workers
            .unwrap_or_else(|| num_cpus::get().saturating_sub(1))
            .max(1)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per request, the first one included.
    pub max_attempts: u16,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Percentage-based jitter to spread out retries.
    pub jitter_ratio: f32,
}

impl RetryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Un-jittered delay before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u16) -> Duration {
        let exp = u32::from(attempt.saturating_sub(1)).min(16);
        let delay = self.backoff_base_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 10_000,
            jitter_ratio: 0.25,
        }
    }
}

/// When an archive counts as slow.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SlowArchiveConfig {
    /// Checkpoints the first range must verify before the clock is read.
    pub sample_checkpoints: usize,
    pub threshold_ms: u64,
}

impl SlowArchiveConfig {
    pub fn threshold(&self) -> Duration {
        Duration::from_millis(self.threshold_ms)
    }
}

impl Default for SlowArchiveConfig {
    fn default() -> Self {
        Self {
            sample_checkpoints: 4,
            threshold_ms: 60_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let retry = RetryConfig {
            max_attempts: 10,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            jitter_ratio: 0.0,
        };
        assert_eq!(retry.backoff_for(1), Duration::from_millis(100));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(200));
        assert_eq!(retry.backoff_for(4), Duration::from_millis(800));
        assert_eq!(retry.backoff_for(5), Duration::from_millis(1_000));
        assert_eq!(retry.backoff_for(60), Duration::from_millis(1_000));
    }

    #[test]
    fn partial_payload_keeps_defaults() {
        let config: ScannerConfig =
            serde_json::from_str(r#"{"concurrency": 2, "retry": {"max_attempts": 7}}"#)
                .expect("parse");
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.backoff_base_ms, 500);
        assert_eq!(config.checkpoint_frequency, 64);
        assert!(config.verify_buckets);
    }

    #[test]
    fn hash_workers_never_zero() {
        let config = ScannerConfig {
            hash_workers: Some(0),
            ..ScannerConfig::default()
        };
        assert_eq!(config.hash_worker_count(), 1);
        assert!(ScannerConfig::default().hash_worker_count() >= 1);
    }
}
