//! Data bridge
//!
//! Orchestrates one component's data: cache-first reads from the
//! warehouse, concurrent fetches for misses, merge by group and merge
//! strategy, and subscriber notification. At most one execution per
//! component is in flight; concurrent callers share its result.
//!
//! Each component carries a generation that moves whenever its requirement
//! changes or its cache is invalidated. A call only joins an execution of
//! the same requirement and generation, and an execution whose generation
//! has moved on neither caches nor publishes its results.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vista_core::{ComponentDataRequirement, DataSourceDescriptor, MergeStrategy};
use vista_fetch::UnifiedExecutor;
use vista_monitoring::EngineMetrics;
use vista_warehouse::{DataWarehouse, StorageStats, WarehouseMetrics};

use crate::error::{panic_message, EngineError, EngineResult};

/// Callback receiving `(component_id, merged data)`
pub type DataUpdateCallback = Arc<dyn Fn(&str, &Map<String, Value>) + Send + Sync>;

/// Handle returned by the subscribe methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Outcome of one component execution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentExecutionResult {
    /// Always true; per-source failures are reported in `failed_sources`
    pub success: bool,
    /// Executed component
    pub component_id: String,
    /// Merged values keyed by source id or group
    pub data: Map<String, Value>,
    /// Sources whose fetch failed and fell back
    pub failed_sources: Vec<String>,
    /// Sources served from the warehouse
    pub cached_sources: Vec<String>,
    /// Completion time
    pub timestamp: DateTime<Utc>,
    /// Wall time of the execution
    pub execution_time_ms: u64,
}

/// Bridge statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    /// Registered update callbacks
    pub active_callbacks: usize,
    /// Components with an execution in flight
    pub in_flight: usize,
    /// Components with a registered requirement
    pub registered_components: usize,
    /// Executions started
    pub executions: u64,
    /// Calls that joined an in-flight execution
    pub joined_executions: u64,
    /// Warehouse metrics
    pub warehouse: WarehouseMetrics,
}

type SharedExecution = Shared<BoxFuture<'static, ComponentExecutionResult>>;

struct InFlight {
    run: u64,
    generation: u64,
    requirement: ComponentDataRequirement,
    execution: SharedExecution,
}

#[derive(Default)]
struct Subscribers {
    global: BTreeMap<u64, DataUpdateCallback>,
    by_component: HashMap<String, BTreeMap<u64, DataUpdateCallback>>,
}

impl Subscribers {
    fn count(&self) -> usize {
        self.global.len() + self.by_component.values().map(BTreeMap::len).sum::<usize>()
    }
}

struct BridgeInner {
    executor: Arc<UnifiedExecutor>,
    warehouse: Arc<DataWarehouse>,
    requirements: RwLock<HashMap<String, ComponentDataRequirement>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    generations: Mutex<HashMap<String, u64>>,
    next_generation: AtomicU64,
    subscribers: RwLock<Subscribers>,
    next_subscription: AtomicU64,
    executions: AtomicU64,
    joined_executions: AtomicU64,
}

/// Component data orchestrator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DataBridge {
    inner: Arc<BridgeInner>,
}

impl DataBridge {
    /// Create a bridge over an executor and a warehouse
    pub fn new(executor: Arc<UnifiedExecutor>, warehouse: Arc<DataWarehouse>) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                executor,
                warehouse,
                requirements: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                generations: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                subscribers: RwLock::new(Subscribers::default()),
                next_subscription: AtomicU64::new(0),
                executions: AtomicU64::new(0),
                joined_executions: AtomicU64::new(0),
            }),
        }
    }

    /// Execute a requirement, joining the in-flight execution for the same
    /// component when it runs the same requirement at the current generation
    pub async fn execute_component(&self, requirement: &ComponentDataRequirement) -> ComponentExecutionResult {
        let execution = {
            let mut in_flight = self.inner.in_flight.lock();
            let generation = self.inner.generation(&requirement.component_id);
            match in_flight.get(&requirement.component_id) {
                Some(existing) if existing.generation == generation && existing.requirement == *requirement => {
                    self.inner.joined_executions.fetch_add(1, Ordering::Relaxed);
                    debug!(component_id = %requirement.component_id, "Joining in-flight execution");
                    existing.execution.clone()
                }
                superseded => {
                    if superseded.is_some() {
                        debug!(component_id = %requirement.component_id, "In-flight execution superseded");
                    }
                    let run = self.inner.executions.fetch_add(1, Ordering::Relaxed);
                    let inner = self.inner.clone();
                    let owned = requirement.clone();
                    let execution = async move { inner.run(owned, generation, run).await }
                        .boxed()
                        .shared();
                    in_flight.insert(
                        requirement.component_id.clone(),
                        InFlight {
                            run,
                            generation,
                            requirement: requirement.clone(),
                            execution: execution.clone(),
                        },
                    );
                    execution
                }
            }
        };

        execution.await
    }

    /// Store or replace a component's requirement. A changed requirement
    /// invalidates the component's cache.
    pub fn register_requirement(&self, requirement: ComponentDataRequirement) -> Option<ComponentDataRequirement> {
        let component_id = requirement.component_id.clone();
        let previous = self
            .inner
            .requirements
            .write()
            .insert(component_id.clone(), requirement.clone());

        if previous.as_ref().map_or(false, |old| *old != requirement) {
            self.inner.invalidate(&component_id);
            debug!(component_id = %component_id, "Requirement replaced, cache invalidated");
        }
        previous
    }

    /// Registered requirement of a component
    pub fn requirement(&self, component_id: &str) -> Option<ComponentDataRequirement> {
        self.inner.requirements.read().get(component_id).cloned()
    }

    /// Execute the registered requirement of a component
    pub async fn execute_registered(&self, component_id: &str) -> EngineResult<ComponentExecutionResult> {
        let requirement = self
            .requirement(component_id)
            .ok_or_else(|| EngineError::ComponentNotFound(component_id.to_string()))?;
        Ok(self.execute_component(&requirement).await)
    }

    /// Drop a component's requirement, subscribers and cache
    pub fn remove_component(&self, component_id: &str) -> bool {
        let removed = self.inner.requirements.write().remove(component_id).is_some();
        self.inner.subscribers.write().by_component.remove(component_id);
        self.inner.invalidate(component_id);
        if removed {
            info!(component_id, "Component removed from data bridge");
        }
        removed
    }

    /// Subscribe to one component's updates
    pub fn on_data_update(&self, component_id: &str, callback: DataUpdateCallback) -> SubscriptionId {
        let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .by_component
            .entry(component_id.to_string())
            .or_default()
            .insert(id, callback);
        SubscriptionId(id)
    }

    /// Subscribe to every component's updates
    pub fn on_any_update(&self, callback: DataUpdateCallback) -> SubscriptionId {
        let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.write().global.insert(id, callback);
        SubscriptionId(id)
    }

    /// Remove a subscription
    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.write();
        if subscribers.global.remove(&subscription.0).is_some() {
            return true;
        }
        let mut removed = false;
        subscribers.by_component.retain(|_, callbacks| {
            removed |= callbacks.remove(&subscription.0).is_some();
            !callbacks.is_empty()
        });
        removed
    }

    /// Fresh cached data of a component
    pub fn get_component_data(&self, component_id: &str) -> Option<Map<String, Value>> {
        self.inner.warehouse.get_component_data(component_id)
    }

    /// Invalidate one component's cache, including results still in flight
    pub fn clear_component_cache(&self, component_id: &str) {
        self.inner.invalidate(component_id);
    }

    /// Invalidate every cache entry, including results still in flight
    pub fn clear_all_cache(&self) {
        self.inner.invalidate_all();
    }

    /// TTL for results stored from now on
    pub fn set_cache_expiry(&self, ttl_ms: u64) {
        self.inner.warehouse.set_default_ttl(ttl_ms);
    }

    /// Warehouse metrics
    pub fn warehouse_metrics(&self) -> WarehouseMetrics {
        self.inner.warehouse.metrics()
    }

    /// Warehouse storage breakdown
    pub fn storage_stats(&self) -> StorageStats {
        self.inner.warehouse.storage_stats()
    }

    /// Bridge statistics
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            active_callbacks: self.inner.subscribers.read().count(),
            in_flight: self.inner.in_flight.lock().len(),
            registered_components: self.inner.requirements.read().len(),
            executions: self.inner.executions.load(Ordering::Relaxed),
            joined_executions: self.inner.joined_executions.load(Ordering::Relaxed),
            warehouse: self.inner.warehouse.metrics(),
        }
    }

    /// Drop all requirements, subscribers and cached data
    pub fn destroy(&self) {
        self.inner.requirements.write().clear();
        *self.inner.subscribers.write() = Subscribers::default();
        self.inner.invalidate_all();
        self.inner.in_flight.lock().clear();
        info!("Data bridge destroyed");
    }
}

impl BridgeInner {
    fn generation(&self, component_id: &str) -> u64 {
        self.generations.lock().get(component_id).copied().unwrap_or(0)
    }

    fn invalidate(&self, component_id: &str) {
        let mut generations = self.generations.lock();
        let next = self.next_generation.fetch_add(1, Ordering::Relaxed);
        generations.insert(component_id.to_string(), next);
        self.warehouse.clear_component_cache(component_id);
    }

    fn invalidate_all(&self) {
        let in_flight: Vec<String> = self.in_flight.lock().keys().cloned().collect();
        let mut generations = self.generations.lock();
        let known: Vec<String> = generations.keys().cloned().chain(in_flight).collect();
        for component_id in known {
            let next = self.next_generation.fetch_add(1, Ordering::Relaxed);
            generations.insert(component_id, next);
        }
        self.warehouse.clear_all_cache();
    }

    /// Store a fetched value unless the component moved to a newer
    /// generation while the fetch ran
    fn store_current(
        &self,
        generation: u64,
        component_id: &str,
        descriptor: &DataSourceDescriptor,
        data: &Value,
    ) {
        let generations = self.generations.lock();
        if generations.get(component_id).copied().unwrap_or(0) != generation {
            debug!(component_id, source_id = %descriptor.id, "Stale generation, result not cached");
            return;
        }
        if let Err(e) = self
            .warehouse
            .store(component_id, &descriptor.id, data.clone(), &descriptor.kind, None)
        {
            warn!(component_id, source_id = %descriptor.id, error = %e, "Result not cached");
        }
    }

    async fn run(
        self: Arc<Self>,
        requirement: ComponentDataRequirement,
        generation: u64,
        run: u64,
    ) -> ComponentExecutionResult {
        let started = Instant::now();
        let component_id = requirement.component_id.as_str();
        let descriptors = &requirement.data_sources;

        let mut values: Vec<Option<Value>> = vec![None; descriptors.len()];
        let mut cached_sources = Vec::new();
        let mut misses = Vec::new();

        for (index, descriptor) in descriptors.iter().enumerate() {
            match self.warehouse.get(component_id, &descriptor.id) {
                Some(value) => {
                    EngineMetrics::record_cache_lookup(component_id, &descriptor.id, true);
                    cached_sources.push(descriptor.id.clone());
                    values[index] = Some(value);
                }
                None => {
                    EngineMetrics::record_cache_lookup(component_id, &descriptor.id, false);
                    misses.push(index);
                }
            }
        }

        let mut failed_sources = Vec::new();
        if !misses.is_empty() {
            let to_fetch: Vec<DataSourceDescriptor> = misses.iter().map(|&i| descriptors[i].clone()).collect();
            let results = self.executor.execute_multiple(&to_fetch).await;

            for (&index, result) in misses.iter().zip(results) {
                let descriptor = &descriptors[index];
                EngineMetrics::record_source_execution(
                    &descriptor.id,
                    &descriptor.kind,
                    result.metadata.response_time_ms,
                    result.success,
                );
                self.warehouse.record_response_time(result.metadata.response_time_ms);

                let value = match (result.success, result.data) {
                    (true, Some(data)) => {
                        self.store_current(generation, component_id, descriptor, &data);
                        data
                    }
                    (true, None) => Value::Null,
                    (false, _) => {
                        failed_sources.push(descriptor.id.clone());
                        self.fallback_value(component_id, descriptor)
                    }
                };
                values[index] = Some(value);
            }
        }

        let data = merge_values(descriptors, values);
        let execution_time_ms = started.elapsed().as_millis() as u64;

        EngineMetrics::record_component_execution(component_id, descriptors.len(), failed_sources.len(), execution_time_ms);

        let result = ComponentExecutionResult {
            success: true,
            component_id: component_id.to_string(),
            data,
            failed_sources,
            cached_sources,
            timestamp: Utc::now(),
            execution_time_ms,
        };

        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.get(component_id).map_or(false, |entry| entry.run == run) {
                in_flight.remove(component_id);
            }
        }

        if self.generation(component_id) != generation {
            debug!(component_id, "Superseded execution finished, results not published");
        } else {
            self.notify(component_id, &result.data);
        }
        result
    }

    /// Last-known-good value, then the descriptor default, then null
    fn fallback_value(&self, component_id: &str, descriptor: &DataSourceDescriptor) -> Value {
        if let Some(stale) = self.warehouse.get_stale(component_id, &descriptor.id) {
            debug!(component_id, source_id = %descriptor.id, "Serving last-known-good value");
            return stale;
        }
        descriptor.default_value.clone().unwrap_or(Value::Null)
    }

    fn notify(&self, component_id: &str, data: &Map<String, Value>) {
        let callbacks: Vec<DataUpdateCallback> = {
            let subscribers = self.subscribers.read();
            subscribers
                .by_component
                .get(component_id)
                .into_iter()
                .flat_map(|callbacks| callbacks.values().cloned())
                .chain(subscribers.global.values().cloned())
                .collect()
        };

        for callback in callbacks {
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(component_id, data))) {
                warn!(component_id, error = %panic_message(panic), "Data update callback panicked");
            }
        }
    }
}

/// Merge per-descriptor values in declaration order. Ungrouped values are
/// keyed by descriptor id; grouped values are combined under the group key
/// at the position of the group's first member, using that member's
/// strategy.
///
/// - `object`: object values are merged key by key, last write wins;
///   anything else is stored under the descriptor id.
/// - `array`: arrays are concatenated, other values appended.
/// - `replace`: the last value wins.
fn merge_values(descriptors: &[DataSourceDescriptor], values: Vec<Option<Value>>) -> Map<String, Value> {
    let mut merged = Map::new();
    let mut strategies: HashMap<&str, MergeStrategy> = HashMap::new();

    for (descriptor, value) in descriptors.iter().zip(values) {
        let value = value.unwrap_or(Value::Null);

        let Some(group) = &descriptor.group else {
            merged.insert(descriptor.id.clone(), value);
            continue;
        };

        let strategy = *strategies.entry(group.as_str()).or_insert(descriptor.merge_strategy);
        let slot = merged.entry(group.clone()).or_insert_with(|| match strategy {
            MergeStrategy::Object => Value::Object(Map::new()),
            MergeStrategy::Array => Value::Array(Vec::new()),
            MergeStrategy::Replace => Value::Null,
        });

        match (strategy, slot) {
            (MergeStrategy::Object, Value::Object(target)) => match value {
                Value::Object(fields) => target.extend(fields),
                other => {
                    target.insert(descriptor.id.clone(), other);
                }
            },
            (MergeStrategy::Array, Value::Array(target)) => match value {
                Value::Array(items) => target.extend(items),
                other => target.push(other),
            },
            (_, slot) => *slot = value,
        }
    }

    merged
}
