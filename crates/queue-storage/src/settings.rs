//! Configuration for the queue storage provider and the in-memory transport.
//!
//! Settings are layered with the `config` crate: an optional file, then
//! environment variables prefixed `QSTORE__` (double-underscore separator),
//! e.g. `QSTORE__MAX_PROCESSING_TRIALS=10`. Every field carries a serde
//! default so an unconfigured environment yields a valid configuration.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for settings overrides
pub const ENV_PREFIX: &str = "QSTORE";

/// Store that receives quarantined messages unless configured otherwise
pub const DEFAULT_FAILING_MESSAGES_STORE: &str = "failing-messages";

// ============================================================================
// Provider Settings
// ============================================================================

/// Settings for [`crate::QueueStorageProvider`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStorageSettings {
    /// Invisibility applied to messages returned by `get`
    pub default_visibility_timeout_seconds: u64,

    /// Deliveries tolerated before a message is quarantined
    pub max_processing_trials: u32,

    /// Extension applied by each keep-alive call
    pub keep_alive_increment_seconds: u64,

    /// Wait before a keep-alive handle first renews
    pub keep_alive_initial_delay_seconds: u64,

    /// Interval between keep-alive renewals
    pub keep_alive_period_seconds: u64,

    /// Concurrent puts issued by `put_range_parallel`
    pub put_range_parallelism: usize,

    /// Persisted store receiving poison messages
    pub failing_messages_store: String,
}

impl Default for QueueStorageSettings {
    fn default() -> Self {
        Self {
            default_visibility_timeout_seconds: 300,
            max_processing_trials: 5,
            keep_alive_increment_seconds: 60,
            keep_alive_initial_delay_seconds: 30,
            keep_alive_period_seconds: 60,
            put_range_parallelism: 16,
            failing_messages_store: DEFAULT_FAILING_MESSAGES_STORE.to_string(),
        }
    }
}

impl QueueStorageSettings {
    /// Load settings from an optional file and `QSTORE__*` environment variables
    ///
    /// The file format is inferred from its extension (TOML, JSON or YAML).
    /// An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings: Self = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.default_visibility_timeout_seconds == 0 {
            return Err(ConfigurationError::Invalid {
                message: "default_visibility_timeout_seconds must be greater than 0".to_string(),
            });
        }

        if self.max_processing_trials == 0 {
            return Err(ConfigurationError::Invalid {
                message: "max_processing_trials must be greater than 0".to_string(),
            });
        }

        if self.keep_alive_increment_seconds == 0 {
            return Err(ConfigurationError::Invalid {
                message: "keep_alive_increment_seconds must be greater than 0".to_string(),
            });
        }

        if self.keep_alive_period_seconds == 0 {
            return Err(ConfigurationError::Invalid {
                message: "keep_alive_period_seconds must be greater than 0".to_string(),
            });
        }

        // Each renewal extends by the increment; a longer period loses ground every cycle.
        if self.keep_alive_period_seconds > self.keep_alive_increment_seconds {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "keep_alive_period_seconds ({}) must not exceed keep_alive_increment_seconds ({})",
                    self.keep_alive_period_seconds, self.keep_alive_increment_seconds
                ),
            });
        }

        if self.put_range_parallelism == 0 {
            return Err(ConfigurationError::Invalid {
                message: "put_range_parallelism must be greater than 0".to_string(),
            });
        }

        if self.failing_messages_store.is_empty() || self.failing_messages_store.contains('/') {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "failing_messages_store '{}' must be a non-empty name without '/'",
                    self.failing_messages_store
                ),
            });
        }

        Ok(())
    }

    pub fn default_visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.default_visibility_timeout_seconds)
    }

    pub fn keep_alive_increment(&self) -> Duration {
        Duration::from_secs(self.keep_alive_increment_seconds)
    }

    pub fn keep_alive_initial_delay(&self) -> Duration {
        Duration::from_secs(self.keep_alive_initial_delay_seconds)
    }

    pub fn keep_alive_period(&self) -> Duration {
        Duration::from_secs(self.keep_alive_period_seconds)
    }
}

// ============================================================================
// In-Memory Transport Configuration
// ============================================================================

/// Configuration for [`crate::providers::InMemoryQueueTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMemoryConfig {
    /// Largest accepted message body in bytes
    pub max_message_size: usize,
    /// Most messages handed out by one receive
    pub max_receive_batch: u32,
    /// Time-to-live applied when a send does not specify one
    pub default_time_to_live: Option<Duration>,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_message_size: 8 * 1024,
            max_receive_batch: 32,
            default_time_to_live: None,
        }
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
