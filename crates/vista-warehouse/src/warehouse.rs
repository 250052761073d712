use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{WarehouseError, WarehouseResult};

/// Default TTL for cached items (5 minutes in milliseconds)
const DEFAULT_CACHE_TTL_MS: u64 = 5 * 60 * 1000;

/// Default memory budget (100MB)
const DEFAULT_MAX_MEMORY_BYTES: usize = 100 * 1024 * 1024;

/// Default maximum number of entries
const DEFAULT_MAX_ITEMS: usize = 1000;

/// Response-time samples kept for the running average
const DEFAULT_RESPONSE_TIME_SAMPLES: usize = 100;

/// Warehouse configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// TTL applied when a store does not override it
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,

    /// Memory budget, in estimated bytes
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: usize,

    /// Maximum number of entries
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Response-time samples kept for the running average
    #[serde(default = "default_response_time_samples")]
    pub response_time_samples: usize,
}

fn default_ttl_ms() -> u64 {
    DEFAULT_CACHE_TTL_MS
}

fn default_max_memory_bytes() -> usize {
    DEFAULT_MAX_MEMORY_BYTES
}

fn default_max_items() -> usize {
    DEFAULT_MAX_ITEMS
}

fn default_response_time_samples() -> usize {
    DEFAULT_RESPONSE_TIME_SAMPLES
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: DEFAULT_CACHE_TTL_MS,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            max_items: DEFAULT_MAX_ITEMS,
            response_time_samples: DEFAULT_RESPONSE_TIME_SAMPLES,
        }
    }
}

/// One cached value
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Owning component
    pub component_id: String,
    /// Source within the component
    pub source_id: String,
    /// Cached value
    pub value: Value,
    /// Kind that produced the value
    pub source_kind: String,
    /// When the value was stored
    pub stored_at: Instant,
    /// Wall-clock store time, for reporting
    pub stored_at_utc: DateTime<Utc>,
    /// Validity after `stored_at`
    pub ttl_ms: u64,
    /// Estimated size in bytes
    pub size_bytes: usize,
    /// Number of cache hits served
    pub access_count: u64,
    /// Last hit, or the store time
    pub last_accessed_at: Instant,
}

impl CacheEntry {
    /// Check if the entry has expired
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= Duration::from_millis(self.ttl_ms)
    }

    /// Update the access statistics
    fn mark_accessed(&mut self, now: Instant) {
        self.last_accessed_at = now;
        self.access_count += 1;
    }
}

/// Point-in-time warehouse metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarehouseMetrics {
    /// Estimated bytes held by live entries
    pub memory_usage_bytes: usize,
    /// Number of entries
    pub item_count: usize,
    /// Number of components with at least one entry
    pub component_count: usize,
    /// Reads served from cache
    pub hits: u64,
    /// Reads that found nothing fresh
    pub misses: u64,
    /// hits + misses
    pub total_requests: u64,
    /// hits / total_requests
    pub hit_rate: f64,
    /// Entries removed to make room
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Average of recorded fetch response times
    pub average_response_time_ms: f64,
    /// Last explicit sweep
    pub last_cleanup_at: Option<DateTime<Utc>>,
}

/// Storage footprint of one component
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStorageStats {
    /// Cached sources
    pub source_count: usize,
    /// Estimated bytes
    pub size_bytes: usize,
    /// Most recent store
    pub last_updated: DateTime<Utc>,
}

/// Storage footprint of the whole warehouse
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    /// Components with entries
    pub total_components: usize,
    /// Entries across all components
    pub total_data_sources: usize,
    /// Estimated bytes
    pub total_size_bytes: usize,
    /// Estimated megabytes
    pub memory_usage_mb: f64,
    /// Per-component breakdown
    pub component_stats: BTreeMap<String, ComponentStorageStats>,
}

#[derive(Default)]
struct WarehouseState {
    entries: HashMap<String, BTreeMap<String, CacheEntry>>,
    last_good: HashMap<String, BTreeMap<String, Value>>,
    total_size: usize,
    item_count: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    response_times: VecDeque<u64>,
    last_cleanup_at: Option<DateTime<Utc>>,
}

impl WarehouseState {
    fn remove_entry(&mut self, component_id: &str, source_id: &str) -> Option<CacheEntry> {
        let sources = self.entries.get_mut(component_id)?;
        let entry = sources.remove(source_id)?;
        if sources.is_empty() {
            self.entries.remove(component_id);
        }
        self.total_size = self.total_size.saturating_sub(entry.size_bytes);
        self.item_count = self.item_count.saturating_sub(1);
        Some(entry)
    }

    /// Move an expired entry to the last-known-good map
    fn expire(&mut self, component_id: &str, source_id: &str) {
        if let Some(entry) = self.remove_entry(component_id, source_id) {
            self.expirations += 1;
            self.last_good
                .entry(entry.component_id)
                .or_default()
                .insert(entry.source_id, entry.value);
        }
    }

    fn evict_least_accessed(&mut self) -> bool {
        let victim = self
            .entries
            .values()
            .flat_map(|sources| sources.values())
            .min_by_key(|entry| (entry.access_count, entry.last_accessed_at))
            .map(|entry| (entry.component_id.clone(), entry.source_id.clone()));

        match victim {
            Some((component_id, source_id)) => {
                debug!(component_id = %component_id, source_id = %source_id, "Evicting least accessed entry");
                self.remove_entry(&component_id, &source_id);
                self.evictions += 1;
                true
            }
            None => false,
        }
    }
}

/// TTL cache of data-source results keyed by `(component_id, source_id)`
pub struct DataWarehouse {
    config: WarehouseConfig,
    default_ttl_ms: Mutex<u64>,
    state: Mutex<WarehouseState>,
}

impl DataWarehouse {
    /// Create a warehouse with custom configuration
    pub fn new(config: WarehouseConfig) -> Self {
        info!(
            default_ttl_ms = config.default_ttl_ms,
            max_items = config.max_items,
            max_memory_mb = config.max_memory_bytes / (1024 * 1024),
            "Creating data warehouse"
        );
        Self {
            default_ttl_ms: Mutex::new(config.default_ttl_ms),
            config,
            state: Mutex::new(WarehouseState::default()),
        }
    }

    /// Store a value. `ttl_ms` overrides the current default TTL.
    pub fn store(
        &self,
        component_id: &str,
        source_id: &str,
        value: Value,
        source_kind: &str,
        ttl_ms: Option<u64>,
    ) -> WarehouseResult<()> {
        let size_bytes = estimate_size(&value)?;
        if size_bytes > self.config.max_memory_bytes {
            warn!(component_id, source_id, size_bytes, "Rejected entry larger than the memory budget");
            return Err(WarehouseError::EntryTooLarge {
                component_id: component_id.to_string(),
                source_id: source_id.to_string(),
                size_bytes,
                limit_bytes: self.config.max_memory_bytes,
            });
        }

        let ttl_ms = ttl_ms.unwrap_or_else(|| self.default_ttl());
        let now = Instant::now();
        let mut state = self.state.lock();

        state.remove_entry(component_id, source_id);

        while state.item_count >= self.config.max_items
            || state.total_size + size_bytes > self.config.max_memory_bytes
        {
            if !state.evict_least_accessed() {
                return Err(WarehouseError::CapacityExceeded(format!(
                    "cannot fit {}/{} ({} bytes)",
                    component_id, source_id, size_bytes
                )));
            }
        }

        let entry = CacheEntry {
            component_id: component_id.to_string(),
            source_id: source_id.to_string(),
            value,
            source_kind: source_kind.to_string(),
            stored_at: now,
            stored_at_utc: Utc::now(),
            ttl_ms,
            size_bytes,
            access_count: 0,
            last_accessed_at: now,
        };

        state
            .entries
            .entry(component_id.to_string())
            .or_default()
            .insert(source_id.to_string(), entry);
        state.total_size += size_bytes;
        state.item_count += 1;

        if let Some(last_good) = state.last_good.get_mut(component_id) {
            last_good.remove(source_id);
        }

        debug!(component_id, source_id, size_bytes, ttl_ms, "Stored data source result");
        Ok(())
    }

    /// Fresh value for a source. Expired entries count as a miss and are
    /// kept as last-known-good.
    pub fn get(&self, component_id: &str, source_id: &str) -> Option<Value> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let expired = match state.entries.get_mut(component_id).and_then(|s| s.get_mut(source_id)) {
            Some(entry) if !entry.is_expired(now) => {
                entry.mark_accessed(now);
                let value = entry.value.clone();
                state.hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            debug!(component_id, source_id, "Cache entry expired");
            state.expire(component_id, source_id);
        }
        state.misses += 1;
        None
    }

    /// Last value stored for a source, fresh or expired
    pub fn get_stale(&self, component_id: &str, source_id: &str) -> Option<Value> {
        let state = self.state.lock();
        state
            .entries
            .get(component_id)
            .and_then(|sources| sources.get(source_id))
            .map(|entry| entry.value.clone())
            .or_else(|| {
                state
                    .last_good
                    .get(component_id)
                    .and_then(|sources| sources.get(source_id))
                    .cloned()
            })
    }

    /// All fresh values of a component keyed by source id
    pub fn get_component_data(&self, component_id: &str) -> Option<Map<String, Value>> {
        let now = Instant::now();
        let state = self.state.lock();
        let sources = state.entries.get(component_id)?;

        let data: Map<String, Value> = sources
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(source_id, entry)| (source_id.clone(), entry.value.clone()))
            .collect();

        if data.is_empty() {
            None
        } else {
            Some(data)
        }
    }

    /// Drop everything cached for a component, including last-known-good values
    pub fn clear_component_cache(&self, component_id: &str) -> usize {
        let mut state = self.state.lock();
        state.last_good.remove(component_id);
        let removed = match state.entries.remove(component_id) {
            Some(sources) => {
                let size: usize = sources.values().map(|e| e.size_bytes).sum();
                state.total_size = state.total_size.saturating_sub(size);
                state.item_count = state.item_count.saturating_sub(sources.len());
                sources.len()
            }
            None => 0,
        };
        debug!(component_id, removed, "Cleared component cache");
        removed
    }

    /// Drop one source of a component
    pub fn clear_source_cache(&self, component_id: &str, source_id: &str) -> bool {
        let mut state = self.state.lock();
        if let Some(last_good) = state.last_good.get_mut(component_id) {
            last_good.remove(source_id);
        }
        state.remove_entry(component_id, source_id).is_some()
    }

    /// Drop everything
    pub fn clear_all_cache(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.last_good.clear();
        state.total_size = 0;
        state.item_count = 0;
        info!("Warehouse cache cleared");
    }

    /// TTL used by stores that do not override it
    pub fn default_ttl(&self) -> u64 {
        *self.default_ttl_ms.lock()
    }

    /// Change the default TTL for subsequent stores
    pub fn set_default_ttl(&self, ttl_ms: u64) {
        *self.default_ttl_ms.lock() = ttl_ms;
        debug!(ttl_ms, "Default cache TTL updated");
    }

    /// Sweep expired entries now, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();

        let expired: Vec<(String, String)> = state
            .entries
            .values()
            .flat_map(|sources| sources.values())
            .filter(|entry| entry.is_expired(now))
            .map(|entry| (entry.component_id.clone(), entry.source_id.clone()))
            .collect();

        for (component_id, source_id) in &expired {
            state.expire(component_id, source_id);
        }
        state.last_cleanup_at = Some(Utc::now());

        if !expired.is_empty() {
            debug!(removed = expired.len(), "Purged expired cache entries");
        }
        expired.len()
    }

    /// Record a fetch response time for the running average
    pub fn record_response_time(&self, response_time_ms: u64) {
        let mut state = self.state.lock();
        state.response_times.push_back(response_time_ms);
        while state.response_times.len() > self.config.response_time_samples {
            state.response_times.pop_front();
        }
    }

    /// Get warehouse metrics
    pub fn metrics(&self) -> WarehouseMetrics {
        let state = self.state.lock();
        let total_requests = state.hits + state.misses;
        let hit_rate = if total_requests > 0 {
            state.hits as f64 / total_requests as f64
        } else {
            0.0
        };
        let average_response_time_ms = if state.response_times.is_empty() {
            0.0
        } else {
            state.response_times.iter().sum::<u64>() as f64 / state.response_times.len() as f64
        };

        WarehouseMetrics {
            memory_usage_bytes: state.total_size,
            item_count: state.item_count,
            component_count: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
            total_requests,
            hit_rate,
            evictions: state.evictions,
            expirations: state.expirations,
            average_response_time_ms,
            last_cleanup_at: state.last_cleanup_at,
        }
    }

    /// Per-component storage breakdown
    pub fn storage_stats(&self) -> StorageStats {
        let state = self.state.lock();
        let component_stats: BTreeMap<String, ComponentStorageStats> = state
            .entries
            .iter()
            .filter_map(|(component_id, sources)| {
                let last_updated = sources.values().map(|e| e.stored_at_utc).max()?;
                Some((
                    component_id.clone(),
                    ComponentStorageStats {
                        source_count: sources.len(),
                        size_bytes: sources.values().map(|e| e.size_bytes).sum(),
                        last_updated,
                    },
                ))
            })
            .collect();

        StorageStats {
            total_components: component_stats.len(),
            total_data_sources: state.item_count,
            total_size_bytes: state.total_size,
            memory_usage_mb: state.total_size as f64 / (1024.0 * 1024.0),
            component_stats,
        }
    }
}

impl Default for DataWarehouse {
    fn default() -> Self {
        Self::new(WarehouseConfig::default())
    }
}

/// Estimated in-memory size: two bytes per serialized character
fn estimate_size(value: &Value) -> WarehouseResult<usize> {
    Ok(serde_json::to_string(value)?.len() * 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn small_warehouse(max_items: usize, max_memory_bytes: usize) -> DataWarehouse {
        DataWarehouse::new(WarehouseConfig {
            max_items,
            max_memory_bytes,
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let warehouse = DataWarehouse::default();
        warehouse.store("c1", "s1", json!(42), "static", Some(50)).unwrap();

        assert_eq!(warehouse.get("c1", "s1"), Some(json!(42)));

        tokio::time::advance(Duration::from_millis(49)).await;
        assert_eq!(warehouse.get("c1", "s1"), Some(json!(42)));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(warehouse.get("c1", "s1"), None);

        // expired value survives as last-known-good
        assert_eq!(warehouse.get_stale("c1", "s1"), Some(json!(42)));

        let metrics = warehouse.metrics();
        assert_eq!(metrics.hits, 2);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.expirations, 1);
        assert_eq!(metrics.item_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ttl_applies_to_later_stores() {
        let warehouse = DataWarehouse::default();
        warehouse.set_default_ttl(10);
        warehouse.store("c1", "s1", json!("x"), "static", None).unwrap();

        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(warehouse.get("c1", "s1"), None);
    }

    #[test]
    fn test_clear_component_cache_is_immediate() {
        let warehouse = DataWarehouse::default();
        warehouse.store("c1", "a", json!(1), "static", None).unwrap();
        warehouse.store("c1", "b", json!(2), "static", None).unwrap();
        warehouse.store("c2", "a", json!(3), "static", None).unwrap();

        assert_eq!(warehouse.clear_component_cache("c1"), 2);
        assert_eq!(warehouse.get("c1", "a"), None);
        assert_eq!(warehouse.get_stale("c1", "a"), None);
        assert_eq!(warehouse.get("c2", "a"), Some(json!(3)));
        assert_eq!(warehouse.metrics().item_count, 1);

        warehouse.clear_all_cache();
        assert_eq!(warehouse.get("c2", "a"), None);
        assert_eq!(warehouse.metrics().memory_usage_bytes, 0);
    }

    #[test]
    fn test_component_data_is_keyed_by_source() {
        let warehouse = DataWarehouse::default();
        warehouse.store("c1", "b", json!({"v": 2}), "json", None).unwrap();
        warehouse.store("c1", "a", json!([1]), "static", None).unwrap();

        let data = warehouse.get_component_data("c1").unwrap();
        assert_eq!(Value::Object(data), json!({"a": [1], "b": {"v": 2}}));
        assert!(warehouse.get_component_data("missing").is_none());
    }

    #[test]
    fn test_least_accessed_entry_is_evicted_at_item_limit() {
        let warehouse = small_warehouse(2, DEFAULT_MAX_MEMORY_BYTES);
        warehouse.store("c", "hot", json!(1), "static", None).unwrap();
        warehouse.store("c", "cold", json!(2), "static", None).unwrap();
        warehouse.get("c", "hot");

        warehouse.store("c", "new", json!(3), "static", None).unwrap();

        assert_eq!(warehouse.get("c", "cold"), None);
        assert_eq!(warehouse.get("c", "hot"), Some(json!(1)));
        assert_eq!(warehouse.get("c", "new"), Some(json!(3)));
        assert_eq!(warehouse.metrics().evictions, 1);
    }

    #[test]
    fn test_oversized_entry_is_rejected() {
        let warehouse = small_warehouse(10, 8);
        let err = warehouse.store("c", "big", json!("0123456789"), "static", None).unwrap_err();

        match err {
            WarehouseError::EntryTooLarge { size_bytes, limit_bytes, .. } => {
                assert_eq!(size_bytes, 24);
                assert_eq!(limit_bytes, 8);
            }
            other => panic!("Expected EntryTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_replacing_entry_keeps_accounting() {
        let warehouse = DataWarehouse::default();
        warehouse.store("c", "s", json!("aa"), "static", None).unwrap();
        warehouse.store("c", "s", json!("aaaa"), "static", None).unwrap();

        let metrics = warehouse.metrics();
        assert_eq!(metrics.item_count, 1);
        assert_eq!(metrics.memory_usage_bytes, "\"aaaa\"".len() * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_and_storage_stats() {
        let warehouse = DataWarehouse::default();
        warehouse.store("c1", "short", json!(1), "static", Some(10)).unwrap();
        warehouse.store("c1", "long", json!(2), "static", Some(10_000)).unwrap();
        warehouse.store("c2", "x", json!(3), "static", None).unwrap();

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(warehouse.purge_expired(), 1);

        let stats = warehouse.storage_stats();
        assert_eq!(stats.total_components, 2);
        assert_eq!(stats.total_data_sources, 2);
        assert_eq!(stats.component_stats["c1"].source_count, 1);
        assert!(warehouse.metrics().last_cleanup_at.is_some());
    }

    #[test]
    fn test_average_response_time() {
        let warehouse = DataWarehouse::new(WarehouseConfig {
            response_time_samples: 2,
            ..Default::default()
        });
        warehouse.record_response_time(100);
        warehouse.record_response_time(20);
        warehouse.record_response_time(40);

        assert_eq!(warehouse.metrics().average_response_time_ms, 30.0);
    }
}
