//! Executor configuration types and defaults.
//!
//! This module defines the configuration options for a JS executor,
//! including engine memory limits, hook installation and logging targets.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default context name used in logs
pub const DEFAULT_CONTEXT_NAME: &str = "nexus-js";

/// Default engine memory limit (0 = unlimited)
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 0;

/// Default engine stack size (1 MB)
pub const DEFAULT_MAX_STACK_SIZE_BYTES: u64 = 1024 * 1024;

/// Default GC threshold (256 KB, the QuickJS default)
pub const DEFAULT_GC_THRESHOLD_BYTES: u64 = 256 * 1024;

/// Default name of the engine queue thread
pub const DEFAULT_QUEUE_THREAD_NAME: &str = "js-engine";

/// Default tracing target for script-side log lines
pub const DEFAULT_SCRIPT_LOG_TARGET: &str = "nexus_js_bridge::js";

/// Configuration for a JS executor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Context name reported in logs
    #[serde(default = "default_context_name")]
    pub context_name: String,

    /// Engine heap limit in bytes (0 = unlimited)
    #[serde(default)]
    pub memory_limit_bytes: u64,

    /// Maximum engine stack size in bytes
    #[serde(default = "default_max_stack_size")]
    pub max_stack_size_bytes: u64,

    /// Allocation threshold that triggers a GC cycle
    #[serde(default = "default_gc_threshold")]
    pub gc_threshold_bytes: u64,

    /// Install `nativeLoggingHook` (default: true)
    #[serde(default = "default_true")]
    pub enable_logging_hook: bool,

    /// Install `nativePerformanceNow` (default: true)
    #[serde(default = "default_true")]
    pub enable_performance_now: bool,

    /// Name of the engine queue thread
    #[serde(default = "default_queue_thread_name")]
    pub queue_thread_name: String,

    /// Enable debug mode (logs every flushed batch)
    #[serde(default)]
    pub debug: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            context_name: DEFAULT_CONTEXT_NAME.to_string(),
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            max_stack_size_bytes: DEFAULT_MAX_STACK_SIZE_BYTES,
            gc_threshold_bytes: DEFAULT_GC_THRESHOLD_BYTES,
            enable_logging_hook: true,
            enable_performance_now: true,
            queue_thread_name: DEFAULT_QUEUE_THREAD_NAME.to_string(),
            debug: false,
        }
    }
}

impl ExecutorConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the context name
    pub fn with_context_name(mut self, name: impl Into<String>) -> Self {
        self.context_name = name.into();
        self
    }

    /// Set the engine memory limit
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    /// Set the engine stack size
    pub fn with_max_stack_size(mut self, bytes: u64) -> Self {
        self.max_stack_size_bytes = bytes;
        self
    }

    /// Set the GC threshold
    pub fn with_gc_threshold(mut self, bytes: u64) -> Self {
        self.gc_threshold_bytes = bytes;
        self
    }

    /// Enable or disable the logging hook
    pub fn with_logging_hook(mut self, enable: bool) -> Self {
        self.enable_logging_hook = enable;
        self
    }

    /// Enable or disable the performance clock hook
    pub fn with_performance_now(mut self, enable: bool) -> Self {
        self.enable_performance_now = enable;
        self
    }

    /// Set the engine queue thread name
    pub fn with_queue_thread_name(mut self, name: impl Into<String>) -> Self {
        self.queue_thread_name = name.into();
        self
    }

    /// Enable debug mode
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Parse a configuration from JSON text
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.context_name.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "context_name".into(),
            });
        }

        if self.memory_limit_bytes != 0 && self.memory_limit_bytes < 1024 * 1024 {
            return Err(ConfigError::InvalidValue {
                field: "memory_limit_bytes".into(),
                reason: "must be 0 (unlimited) or at least 1MB".into(),
            });
        }

        if self.max_stack_size_bytes < 64 * 1024 {
            return Err(ConfigError::InvalidValue {
                field: "max_stack_size_bytes".into(),
                reason: "must be at least 64KB".into(),
            });
        }

        if self.queue_thread_name.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "queue_thread_name".into(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field name
        field: String,
        /// The reason it's invalid
        reason: String,
    },

    /// Missing required field
    #[error("Missing required configuration field: {field}")]
    MissingField {
        /// The field name
        field: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Default value functions for serde
fn default_context_name() -> String {
    DEFAULT_CONTEXT_NAME.to_string()
}

fn default_max_stack_size() -> u64 {
    DEFAULT_MAX_STACK_SIZE_BYTES
}

fn default_gc_threshold() -> u64 {
    DEFAULT_GC_THRESHOLD_BYTES
}

fn default_queue_thread_name() -> String {
    DEFAULT_QUEUE_THREAD_NAME.to_string()
}

fn default_true() -> bool {
    true
}
