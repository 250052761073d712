use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use tracing::warn;
use vista_monitoring::MonitoringConfig;
use vista_warehouse::WarehouseConfig;

use crate::error::{EngineError, EngineResult};
use crate::events::EventBusConfig;
use crate::loop_guard::LoopGuardConfig;
use crate::scheduler::SchedulerConfig;

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Result cache
    #[serde(default)]
    pub warehouse: WarehouseConfig,

    /// Polling scheduler
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Config event bus
    #[serde(default)]
    pub event_bus: EventBusConfig,

    /// Loop protection
    #[serde(default)]
    pub loop_guard: LoopGuardConfig,

    /// Logging
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        let mut config = Self::from_lookup(|key| env::var(key).ok());
        config.monitoring = MonitoringConfig::load();
        config
    }

    /// Build configuration from a variable lookup, starting from defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        override_from(&lookup, "VISTA_CACHE_TTL_MS", &mut config.warehouse.default_ttl_ms);
        override_from(&lookup, "VISTA_CACHE_MAX_ITEMS", &mut config.warehouse.max_items);
        override_from(&lookup, "VISTA_CACHE_MAX_MEMORY_BYTES", &mut config.warehouse.max_memory_bytes);

        override_from(&lookup, "VISTA_POLL_MIN_INTERVAL_MS", &mut config.scheduler.min_interval_ms);
        override_from(&lookup, "VISTA_POLL_TICK_MS", &mut config.scheduler.tick_ms);
        override_from(&lookup, "VISTA_POLL_BATCH_SIZE", &mut config.scheduler.batch_size);

        override_from(&lookup, "VISTA_DEDUP_WINDOW_MS", &mut config.event_bus.dedup_window_ms);

        override_from(&lookup, "VISTA_LOOP_MAX_DEPTH", &mut config.loop_guard.max_depth);
        override_from(&lookup, "VISTA_LOOP_WINDOW_MS", &mut config.loop_guard.time_window_ms);
        override_from(&lookup, "VISTA_LOOP_MAX_CALLS", &mut config.loop_guard.max_calls_in_window);
        override_from(&lookup, "VISTA_LOOP_COOLDOWN_MS", &mut config.loop_guard.cooldown_ms);

        config
    }

    /// Parse a YAML document; missing sections take their defaults
    pub fn from_yaml(yaml: &str) -> EngineResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or disable a subsystem
    pub fn validate(&self) -> EngineResult<()> {
        let checks = [
            (self.warehouse.max_items == 0, "warehouse.max_items must be positive"),
            (self.warehouse.max_memory_bytes == 0, "warehouse.max_memory_bytes must be positive"),
            (self.scheduler.tick_ms == 0, "scheduler.tick_ms must be positive"),
            (self.scheduler.batch_size == 0, "scheduler.batch_size must be positive"),
            (self.loop_guard.max_depth == 0, "loop_guard.max_depth must be positive"),
            (self.loop_guard.time_window_ms == 0, "loop_guard.time_window_ms must be positive"),
            (self.loop_guard.max_calls_in_window == 0, "loop_guard.max_calls_in_window must be positive"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(EngineError::ConfigError(message.to_string())),
            None => Ok(()),
        }
    }
}

fn override_from<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!("Invalid {} value: {}, using default", key, raw),
        }
    }
}
