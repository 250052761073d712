use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vista_monitoring::EngineMetrics;

use super::filters::{BaseRelevanceFilter, DeduplicationFilter, EventFilter, IgnoreSystemUpdatesFilter};
use super::types::{ConfigChangeEvent, ConfigEventType};
use crate::error::{panic_message, EngineResult};

/// Async config event handler
pub type ConfigEventHandler = Arc<dyn Fn(ConfigChangeEvent) -> BoxFuture<'static, EngineResult<()>> + Send + Sync>;

/// Handle returned by [`ConfigEventBus::on_config_change`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId {
    event_type: ConfigEventType,
    id: u64,
}

/// Event bus configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Dedup window
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,

    /// Base fields whose change re-runs data execution
    #[serde(default = "default_critical_base_fields")]
    pub critical_base_fields: Vec<String>,
}

fn default_dedup_window_ms() -> u64 {
    200
}

fn default_critical_base_fields() -> Vec<String> {
    vec!["deviceId".to_string(), "metricsList".to_string()]
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: default_dedup_window_ms(),
            critical_base_fields: default_critical_base_fields(),
        }
    }
}

/// Event bus counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBusStatistics {
    /// Events passed to `emit_config_change`
    pub events_emitted: u64,
    /// Events dropped by a filter
    pub events_filtered: u64,
    /// Handler invocations
    pub handlers_executed: u64,
    /// Handler errors and panics
    pub errors: u64,
    /// Events forwarded to the execution trigger
    pub triggers_sent: u64,
}

/// Typed pub/sub channel for configuration changes
pub struct ConfigEventBus {
    handlers: RwLock<HashMap<ConfigEventType, BTreeMap<u64, ConfigEventHandler>>>,
    filters: RwLock<Vec<Arc<dyn EventFilter>>>,
    trigger: Mutex<Option<mpsc::UnboundedSender<ConfigChangeEvent>>>,
    next_id: AtomicU64,
    stats: Mutex<EventBusStatistics>,
}

impl ConfigEventBus {
    /// Create a bus with no filters
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            filters: RwLock::new(Vec::new()),
            trigger: Mutex::new(None),
            next_id: AtomicU64::new(0),
            stats: Mutex::new(EventBusStatistics::default()),
        }
    }

    /// Create a bus with the dedup, base-relevance and system-update filters
    pub fn with_default_filters(config: &EventBusConfig) -> Self {
        let bus = Self::new();
        bus.add_filter(Arc::new(DeduplicationFilter::new(config.dedup_window_ms)));
        bus.add_filter(Arc::new(BaseRelevanceFilter::new(config.critical_base_fields.clone())));
        bus.add_filter(Arc::new(IgnoreSystemUpdatesFilter));
        bus
    }

    /// Subscribe a handler to one event type
    pub fn on_config_change(&self, event_type: ConfigEventType, handler: ConfigEventHandler) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .entry(event_type)
            .or_default()
            .insert(id, handler);
        debug!(?event_type, handler_id = id, "Config event handler registered");
        HandlerId { event_type, id }
    }

    /// Remove a handler
    pub fn unsubscribe(&self, handler: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        match handlers.get_mut(&handler.event_type) {
            Some(registered) => {
                let removed = registered.remove(&handler.id).is_some();
                if registered.is_empty() {
                    handlers.remove(&handler.event_type);
                }
                removed
            }
            None => false,
        }
    }

    /// Insert a filter, keeping descending priority order. Equal priorities
    /// keep insertion order.
    pub fn add_filter(&self, filter: Arc<dyn EventFilter>) {
        let mut filters = self.filters.write();
        let position = filters
            .iter()
            .position(|existing| existing.priority() < filter.priority())
            .unwrap_or(filters.len());
        debug!(filter = filter.name(), priority = filter.priority(), "Event filter added");
        filters.insert(position, filter);
    }

    /// Remove a filter by name
    pub fn remove_filter(&self, name: &str) -> bool {
        let mut filters = self.filters.write();
        let before = filters.len();
        filters.retain(|filter| filter.name() != name);
        filters.len() != before
    }

    /// Filter names in evaluation order
    pub fn filter_names(&self) -> Vec<String> {
        self.filters.read().iter().map(|f| f.name().to_string()).collect()
    }

    /// Install the execution-trigger consumer. Registering again replaces
    /// the previous consumer.
    pub fn register_execution_trigger(&self) -> mpsc::UnboundedReceiver<ConfigChangeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.trigger.lock().replace(tx).is_some() {
            info!("Execution trigger replaced");
        }
        rx
    }

    /// Remove the execution-trigger consumer
    pub fn unregister_execution_trigger(&self) -> bool {
        self.trigger.lock().take().is_some()
    }

    /// Filter and dispatch one event. Returns false when a filter dropped it.
    pub async fn emit_config_change(&self, mut event: ConfigChangeEvent) -> bool {
        self.stats.lock().events_emitted += 1;

        if !self.passes_filters(&mut event) {
            self.stats.lock().events_filtered += 1;
            EngineMetrics::record_config_event(&event.component_id, event.section.as_str(), false);
            return false;
        }

        self.dispatch(&[ConfigEventType::BeforeConfigChange], &event).await;
        self.dispatch(
            &[
                ConfigEventType::ConfigChanged,
                ConfigEventType::for_section(event.section),
            ],
            &event,
        )
        .await;

        if event.should_trigger_execution() {
            self.send_trigger(&event);
        }

        self.dispatch(&[ConfigEventType::AfterConfigChange], &event).await;

        EngineMetrics::record_config_event(&event.component_id, event.section.as_str(), true);
        true
    }

    fn passes_filters(&self, event: &mut ConfigChangeEvent) -> bool {
        let filters: Vec<Arc<dyn EventFilter>> = self.filters.read().clone();

        for filter in filters {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| filter.apply(event)));
            match outcome {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    debug!(
                        filter = filter.name(),
                        component_id = %event.component_id,
                        section = %event.section,
                        "Config event filtered"
                    );
                    return false;
                }
                Ok(Err(e)) => {
                    warn!(filter = filter.name(), error = %e, "Event filter failed, letting event pass");
                }
                Err(panic) => {
                    warn!(
                        filter = filter.name(),
                        error = %panic_message(panic),
                        "Event filter panicked, letting event pass"
                    );
                }
            }
        }
        true
    }

    /// Run every handler of the given types concurrently and wait for all
    async fn dispatch(&self, event_types: &[ConfigEventType], event: &ConfigChangeEvent) {
        let handlers: Vec<ConfigEventHandler> = {
            let registered = self.handlers.read();
            event_types
                .iter()
                .filter_map(|event_type| registered.get(event_type))
                .flat_map(|handlers| handlers.values().cloned())
                .collect()
        };

        if handlers.is_empty() {
            return;
        }

        let runs = handlers.into_iter().map(|handler| {
            let event = event.clone();
            AssertUnwindSafe(async move { handler(event).await }).catch_unwind()
        });
        let outcomes = join_all(runs).await;

        let mut stats = self.stats.lock();
        for outcome in outcomes {
            stats.handlers_executed += 1;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    stats.errors += 1;
                    warn!(component_id = %event.component_id, error = %e, "Config event handler failed");
                }
                Err(panic) => {
                    stats.errors += 1;
                    warn!(
                        component_id = %event.component_id,
                        error = %panic_message(panic),
                        "Config event handler panicked"
                    );
                }
            }
        }
    }

    fn send_trigger(&self, event: &ConfigChangeEvent) {
        let mut trigger = self.trigger.lock();
        let Some(tx) = trigger.as_ref() else {
            return;
        };

        if tx.send(event.clone()).is_err() {
            warn!("Execution trigger receiver dropped, clearing trigger");
            *trigger = None;
            return;
        }
        drop(trigger);

        self.stats.lock().triggers_sent += 1;
        debug!(component_id = %event.component_id, section = %event.section, "Execution trigger sent");
    }

    /// Counters snapshot
    pub fn statistics(&self) -> EventBusStatistics {
        self.stats.lock().clone()
    }

    /// Number of handlers across all event types
    pub fn handler_count(&self) -> usize {
        self.handlers.read().values().map(BTreeMap::len).sum()
    }

    /// Remove all handlers and filters and reset counters
    pub fn clear(&self) {
        self.handlers.write().clear();
        self.filters.write().clear();
        *self.stats.lock() = EventBusStatistics::default();
    }
}

impl Default for ConfigEventBus {
    fn default() -> Self {
        Self::with_default_filters(&EventBusConfig::default())
    }
}
