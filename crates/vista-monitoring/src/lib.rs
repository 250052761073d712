//! Monitoring module for the Vista engine.
//!
//! Provides subscriber setup for structured logs and the engine's
//! metric recording points. Metrics are emitted as structured tracing
//! events so any subscriber can aggregate them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogExt};
pub use metrics::EngineMetrics;

/// Configuration for initializing the monitoring system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Service name attached to startup logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Log level filter (e.g., "info,vista_engine=debug")
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Emit JSON lines instead of the pretty format
    #[serde(default)]
    pub enable_json_logging: bool,
}

fn default_service_name() -> String {
    "vista".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_filter: default_log_filter(),
            enable_json_logging: false,
        }
    }
}

impl MonitoringConfig {
    /// Load from `VISTA_LOG_LEVEL` and `VISTA_LOG_FORMAT` (`json` or `pretty`)
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Ok(filter) = env::var("VISTA_LOG_LEVEL") {
            if !filter.trim().is_empty() {
                config.log_filter = filter;
            }
        }

        if let Ok(format) = env::var("VISTA_LOG_FORMAT") {
            match format.to_lowercase().as_str() {
                "json" => config.enable_json_logging = true,
                "pretty" => config.enable_json_logging = false,
                other => warn!("Invalid VISTA_LOG_FORMAT value: {}, using default", other),
            }
        }

        config
    }
}
