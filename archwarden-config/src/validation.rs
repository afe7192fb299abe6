use archwarden_core::ScannerConfig;
use thiserror::Error;

/// Hard limits a configuration must respect before a scan starts.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigGuardRailError {
    #[error("{field} must be at least 1")]
    Zero { field: &'static str },
    #[error("retry.jitter_ratio must be within 0.0..=1.0, got {0}")]
    JitterOutOfRange(f32),
    #[error("retry.backoff_base_ms ({base}) exceeds retry.backoff_max_ms ({max})")]
    BackoffInverted { base: u64, max: u64 },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Rejects configurations a scan cannot run with and collects the ones it
/// can run with but probably should not.
pub fn validate(config: &ScannerConfig) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    if config.concurrency == 0 {
        return Err(ConfigGuardRailError::Zero { field: "concurrency" });
    }
    if config.checkpoint_frequency == 0 {
        return Err(ConfigGuardRailError::Zero {
            field: "checkpoint_frequency",
        });
    }
    if config.hash_workers == Some(0) {
        return Err(ConfigGuardRailError::Zero { field: "hash_workers" });
    }
    if config.retry.max_attempts == 0 {
        return Err(ConfigGuardRailError::Zero {
            field: "retry.max_attempts",
        });
    }
    if config.request_timeout_ms == 0 {
        return Err(ConfigGuardRailError::Zero {
            field: "request_timeout_ms",
        });
    }
    if !(0.0..=1.0).contains(&config.retry.jitter_ratio) {
        return Err(ConfigGuardRailError::JitterOutOfRange(config.retry.jitter_ratio));
    }
    if config.retry.backoff_base_ms > config.retry.backoff_max_ms {
        return Err(ConfigGuardRailError::BackoffInverted {
            base: config.retry.backoff_base_ms,
            max: config.retry.backoff_max_ms,
        });
    }

    if config.checkpoint_frequency != 64 {
        warnings.push_with_hint(
            format!(
                "checkpoint_frequency is {}; public networks publish every 64 ledgers",
                config.checkpoint_frequency
            ),
            "Only change this for archives of private networks with accelerated checkpoints",
        );
    }
    if !config.verify_buckets {
        warnings.push("bucket verification disabled; bucket files will not be downloaded");
    }
    if config.retry.max_attempts == 1 {
        warnings.push_with_hint(
            "retries disabled; a single timeout will fail its range",
            "Set retry.max_attempts above 1 for public archives",
        );
    }

    Ok(warnings)
}
