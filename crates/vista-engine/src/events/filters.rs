use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::types::{ChangeSource, ConfigChangeEvent, ConfigSection};
use crate::error::EngineResult;

/// Global event filter. Filters run by descending priority; returning
/// `Ok(false)` drops the event and an `Err` lets it pass.
pub trait EventFilter: Send + Sync {
    /// Unique filter name
    fn name(&self) -> &str;

    /// Higher runs first
    fn priority(&self) -> i32;

    /// Decide whether the event propagates. Filters may annotate the
    /// event's context.
    fn apply(&self, event: &mut ConfigChangeEvent) -> EngineResult<bool>;
}

/// Drops repeats of the same `(component, section, new config)` content
/// within a short window
pub struct DeduplicationFilter {
    window: Duration,
    recent: Mutex<HashMap<(String, ConfigSection), (String, Instant)>>,
}

impl DeduplicationFilter {
    /// Filter name
    pub const NAME: &'static str = "deduplicate";

    /// Create a filter with the given window
    pub fn new(window_ms: u64) -> Self {
        Self {
            window: Duration::from_millis(window_ms),
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Hex sha256 over component, section and canonical new config
    pub fn content_hash(event: &ConfigChangeEvent) -> String {
        let mut canonical = String::new();
        write_canonical(&event.new_config, &mut canonical);

        let mut hasher = Sha256::new();
        hasher.update(event.component_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(event.section.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Serialize with object keys sorted so equal content hashes equally
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

impl EventFilter for DeduplicationFilter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        200
    }

    fn apply(&self, event: &mut ConfigChangeEvent) -> EngineResult<bool> {
        let hash = Self::content_hash(event);
        let key = (event.component_id.clone(), event.section);
        let now = Instant::now();
        let mut recent = self.recent.lock();

        recent.retain(|_, (_, seen)| now.saturating_duration_since(*seen) < self.window);

        if let Some((previous, _)) = recent.get(&key) {
            if *previous == hash {
                debug!(
                    component_id = %event.component_id,
                    section = %event.section,
                    "Duplicate config event dropped"
                );
                return Ok(false);
            }
        }

        recent.insert(key, (hash, now));
        Ok(true)
    }
}

/// Classifies changes: `dataSource` changes always re-run data, `base`
/// changes only when a critical field changed. A non-critical change
/// keeps whatever the caller put in the context.
pub struct BaseRelevanceFilter {
    critical_fields: Vec<String>,
}

impl BaseRelevanceFilter {
    /// Filter name
    pub const NAME: &'static str = "base-relevance";

    /// Create a filter with the fields data fetching depends on
    pub fn new(critical_fields: Vec<String>) -> Self {
        Self { critical_fields }
    }

    /// Top-level keys whose values differ between old and new config
    pub fn changed_fields(old: Option<&Value>, new: &Value) -> Vec<String> {
        let empty = serde_json::Map::new();
        let old = old.and_then(Value::as_object).unwrap_or(&empty);
        let new = new.as_object().unwrap_or(&empty);

        let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
        keys.into_iter()
            .filter(|key| old.get(*key) != new.get(*key))
            .cloned()
            .collect()
    }
}

impl EventFilter for BaseRelevanceFilter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        150
    }

    fn apply(&self, event: &mut ConfigChangeEvent) -> EngineResult<bool> {
        match event.section {
            ConfigSection::DataSource => {
                event.context_mut().should_trigger_execution = Some(true);
            }
            ConfigSection::Base => {
                if event.context.as_ref().map_or(true, |ctx| ctx.changed_fields.is_empty()) {
                    let changed = Self::changed_fields(event.old_config.as_ref(), &event.new_config);
                    event.context_mut().changed_fields = changed;
                }

                let context = event.context_mut();
                if context
                    .changed_fields
                    .iter()
                    .any(|field| self.critical_fields.contains(field))
                {
                    context.should_trigger_execution = Some(true);
                }
            }
            ConfigSection::Component | ConfigSection::Interaction => {}
        }
        Ok(true)
    }
}

/// Drops system updates that explicitly opt out of execution
pub struct IgnoreSystemUpdatesFilter;

impl IgnoreSystemUpdatesFilter {
    /// Filter name
    pub const NAME: &'static str = "ignore-system-updates";
}

impl EventFilter for IgnoreSystemUpdatesFilter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        100
    }

    fn apply(&self, event: &mut ConfigChangeEvent) -> EngineResult<bool> {
        let opted_out = event
            .context
            .as_ref()
            .and_then(|ctx| ctx.should_trigger_execution)
            == Some(false);
        Ok(!(event.source == ChangeSource::System && opted_out))
    }
}
