//! Configuration module for Cardbox.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation, and defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::ResolutionStrategy;

/// Top-level configuration for the Cardbox sync engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub queue: QueueConfig,
    pub dispatch: DispatchConfig,
    pub retry: RetryConfig,
    pub conflicts: ConflictsConfig,
    pub health: HealthConfig,
    pub logging: LoggingConfig,
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// One full (pull + push) sync every N incremental cycles.
    pub full_sync_every: u32,
    /// Lower bound on the adaptive interval, in seconds.
    pub min_interval_secs: u64,
}

/// Operation queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Retry budget per operation before it is dead-lettered.
    pub max_retries: u32,
    /// Queue capacity; lowest-priority oldest entries are evicted beyond it.
    pub capacity: usize,
}

/// Batch dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Batch size used before any adaptive feedback exists.
    pub initial_batch_size: usize,
    /// Lower bound on the adaptive batch size.
    pub min_batch_size: usize,
    /// Upper bound on the adaptive batch size.
    pub max_batch_size: usize,
    /// Sub-batches executed concurrently within one dispatch cycle.
    pub max_concurrent_batches: usize,
}

/// Retry/backoff settings for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Delay multiplier per subsequent retry.
    pub multiplier: u32,
    /// Upper bound on any single delay, in milliseconds.
    pub cap_ms: u64,
}

/// Conflict resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictsConfig {
    /// Strategy applied when no per-conflict choice is made. `None` means
    /// last-write-wins on timestamps.
    pub default_strategy: Option<ResolutionStrategy>,
    /// Risk level at or above which automatic merge is refused and the
    /// conflict falls back to `create_new` or manual handling.
    pub unsafe_merge_severity: f64,
}

/// Health indicator thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Error rate over the rolling window that degrades health to warning.
    pub warning_error_rate: f64,
    /// Error rate that degrades health to critical.
    pub critical_error_rate: f64,
    /// Queue depth that degrades health to warning.
    pub warning_queue_depth: usize,
    /// Queue depth that degrades health to critical.
    pub critical_queue_depth: usize,
    /// Number of recent cycles considered in the rolling window.
    pub window: usize,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Path to the log file; `None` logs to stderr only.
    pub file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/cardbox/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("cardbox")
            .join("config.yaml")
    }

    /// Validate the configuration, returning every problem found.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.dispatch.min_batch_size == 0 {
            errors.push(ValidationError {
                field: "dispatch.min_batch_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.dispatch.min_batch_size > self.dispatch.max_batch_size {
            errors.push(ValidationError {
                field: "dispatch.min_batch_size".to_string(),
                message: "must not exceed dispatch.max_batch_size".to_string(),
            });
        }
        if self.dispatch.max_concurrent_batches == 0 {
            errors.push(ValidationError {
                field: "dispatch.max_concurrent_batches".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.queue.capacity == 0 {
            errors.push(ValidationError {
                field: "queue.capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.retry.multiplier == 0 {
            errors.push(ValidationError {
                field: "retry.multiplier".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.health.warning_error_rate)
            || !(0.0..=1.0).contains(&self.health.critical_error_rate)
        {
            errors.push(ValidationError {
                field: "health".to_string(),
                message: "error rates must be within 0.0..=1.0".to_string(),
            });
        }
        if self.health.warning_error_rate > self.health.critical_error_rate {
            errors.push(ValidationError {
                field: "health.warning_error_rate".to_string(),
                message: "must not exceed health.critical_error_rate".to_string(),
            });
        }
        errors
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            full_sync_every: 10,
            min_interval_secs: 30,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            capacity: 1000,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: 50,
            min_batch_size: 10,
            max_batch_size: 200,
            max_concurrent_batches: 3,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            multiplier: 2,
            cap_ms: 30_000,
        }
    }
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            default_strategy: None,
            unsafe_merge_severity: 0.5,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            warning_error_rate: 0.2,
            critical_error_rate: 0.5,
            warning_queue_depth: 200,
            critical_queue_depth: 800,
            window: 20,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"dispatch.min_batch_size"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
