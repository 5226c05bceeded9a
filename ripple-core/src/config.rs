//! Engine Configuration
//!
//! Per-thread knobs for the reactive engine. A configuration is usually
//! built with [`EngineConfig::default`] or loaded from JSON and installed
//! with [`Runtime::configure`](crate::reactive::Runtime::configure).

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::graph::SchedulerKind;

/// Default number of drain rounds a single flush may perform.
pub const DEFAULT_MAX_FLUSH_ITERATIONS: usize = 100;

/// Configuration of the reactive engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Scheduler used by observers registered with default options.
    pub default_scheduler: SchedulerKind,

    /// Upper bound on drain rounds per flush.
    ///
    /// Observers that keep invalidating each other would otherwise loop
    /// forever. When the bound is hit the remaining notifications are
    /// dropped and an error is logged.
    pub max_flush_iterations: usize,
}

impl EngineConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_scheduler: SchedulerKind::Direct,
            max_flush_iterations: DEFAULT_MAX_FLUSH_ITERATIONS,
        }
    }
}
