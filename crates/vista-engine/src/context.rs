//! Engine context
//!
//! Owns one instance of every engine service. Nothing in the engine is a
//! process-wide singleton; tests and hosts construct as many isolated
//! contexts as they need.

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vista_core::{ComponentDataRequirement, FormatNormalizer};
use vista_fetch::UnifiedExecutor;
use vista_warehouse::DataWarehouse;

use crate::bridge::{ComponentExecutionResult, DataBridge};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{ConfigChangeEvent, ConfigEventBus, ConfigSection};
use crate::loop_guard::LoopProtectionManager;
use crate::scheduler::{GlobalPollingScheduler, PollCallback};

const EXECUTE_COMPONENT: &str = "executeComponent";

/// Explicitly constructed set of engine services
pub struct EngineContext {
    config: EngineConfig,
    executor: Arc<UnifiedExecutor>,
    warehouse: Arc<DataWarehouse>,
    bridge: DataBridge,
    scheduler: GlobalPollingScheduler,
    event_bus: Arc<ConfigEventBus>,
    loop_guard: Arc<LoopProtectionManager>,
    trigger_worker: Mutex<Option<JoinHandle<()>>>,
}

impl EngineContext {
    /// Build a context with the default executor (built-in kinds over reqwest)
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        Self::with_executor(config, Arc::new(UnifiedExecutor::default()))
    }

    /// Build a context around a caller-supplied executor
    pub fn with_executor(config: EngineConfig, executor: Arc<UnifiedExecutor>) -> EngineResult<Self> {
        config.validate()?;

        let warehouse = Arc::new(DataWarehouse::new(config.warehouse.clone()));
        let bridge = DataBridge::new(executor.clone(), warehouse.clone());
        let scheduler = GlobalPollingScheduler::new(config.scheduler.clone());
        let event_bus = Arc::new(ConfigEventBus::with_default_filters(&config.event_bus));
        let loop_guard = Arc::new(LoopProtectionManager::new(config.loop_guard.clone()));

        info!(
            kinds = ?executor.supported_kinds(),
            cache_ttl_ms = config.warehouse.default_ttl_ms,
            poll_tick_ms = config.scheduler.tick_ms,
            "Engine context created"
        );

        Ok(Self {
            config,
            executor,
            warehouse,
            bridge,
            scheduler,
            event_bus,
            loop_guard,
            trigger_worker: Mutex::new(None),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fetch executor
    pub fn executor(&self) -> &Arc<UnifiedExecutor> {
        &self.executor
    }

    /// Result cache
    pub fn warehouse(&self) -> &Arc<DataWarehouse> {
        &self.warehouse
    }

    /// Data bridge
    pub fn bridge(&self) -> &DataBridge {
        &self.bridge
    }

    /// Polling scheduler
    pub fn scheduler(&self) -> &GlobalPollingScheduler {
        &self.scheduler
    }

    /// Config event bus
    pub fn event_bus(&self) -> &Arc<ConfigEventBus> {
        &self.event_bus
    }

    /// Loop protection
    pub fn loop_guard(&self) -> &Arc<LoopProtectionManager> {
        &self.loop_guard
    }

    /// Normalize a raw data-source configuration and register it for the
    /// component
    pub fn register_component(&self, component_id: &str, raw: &Value) -> EngineResult<ComponentDataRequirement> {
        register_with(&self.bridge, component_id, raw)
    }

    /// Execute a registered component through the loop guard
    pub async fn execute_component(&self, component_id: &str) -> EngineResult<ComponentExecutionResult> {
        guarded_execute(&self.bridge, &self.loop_guard, component_id, "manual").await
    }

    /// Poll a registered component. Returns the task id.
    pub fn start_polling(&self, component_id: &str, interval_ms: u64) -> EngineResult<String> {
        if self.bridge.requirement(component_id).is_none() {
            return Err(EngineError::ComponentNotFound(component_id.to_string()));
        }

        let bridge = self.bridge.clone();
        let loop_guard = self.loop_guard.clone();
        let component = component_id.to_string();
        let callback: PollCallback = Arc::new(move || {
            let bridge = bridge.clone();
            let loop_guard = loop_guard.clone();
            let component = component.clone();
            async move {
                if let Err(e) = guarded_execute(&bridge, &loop_guard, &component, "polling").await {
                    warn!(component_id = %component, error = %e, "Polling execution rejected");
                }
            }
            .boxed()
        });

        Ok(self.scheduler.add_task(component_id, interval_ms, callback, true))
    }

    /// Consume execution triggers from the event bus. Replaces a previously
    /// started worker.
    pub fn start_trigger_worker(&self) -> EngineResult<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::ConfigError(format!("trigger worker needs a tokio runtime: {}", e)))?;

        let receiver = self.event_bus.register_execution_trigger();
        let worker = handle.spawn(run_trigger_worker(receiver, self.bridge.clone(), self.loop_guard.clone()));

        if let Some(previous) = self.trigger_worker.lock().replace(worker) {
            previous.abort();
        }
        info!("Execution trigger worker started");
        Ok(())
    }

    /// Stop polling and drop every trace of a component
    pub fn remove_component(&self, component_id: &str) -> bool {
        let tasks = self.scheduler.remove_component_tasks(component_id);
        let removed = self.bridge.remove_component(component_id);
        debug!(component_id, tasks, removed, "Component removed");
        removed || tasks > 0
    }

    /// Read-only snapshot of every service's statistics
    pub fn debug_snapshot(&self) -> Value {
        json!({
            "bridge": self.bridge.stats(),
            "storage": self.bridge.storage_stats(),
            "scheduler": self.scheduler.statistics(),
            "pollingTasks": self.scheduler.all_tasks(),
            "eventBus": self.event_bus.statistics(),
            "loopGuard": self.loop_guard.stats(),
            "blacklisted": self.loop_guard.blacklisted(),
            "supportedKinds": self.executor.supported_kinds(),
        })
    }

    /// Stop workers and timers and release every resource
    pub async fn shutdown(&self) {
        if let Some(worker) = self.trigger_worker.lock().take() {
            worker.abort();
        }
        self.event_bus.unregister_execution_trigger();
        self.event_bus.clear();
        self.scheduler.destroy();
        self.bridge.destroy();
        self.loop_guard.reset();
        self.executor.cleanup().await;
        info!("Engine context shut down");
    }
}

impl Drop for EngineContext {
    fn drop(&mut self) {
        if let Some(worker) = self.trigger_worker.get_mut().take() {
            worker.abort();
        }
        self.scheduler.destroy();
    }
}

fn register_with(bridge: &DataBridge, component_id: &str, raw: &Value) -> EngineResult<ComponentDataRequirement> {
    let mut standard = FormatNormalizer::normalize_to_standard(raw, component_id);
    standard.component_id = component_id.to_string();
    if standard.data_sources.is_empty() {
        return Err(EngineError::ConfigError(format!(
            "component '{}' has no data sources",
            component_id
        )));
    }

    let requirement = FormatNormalizer::to_requirement(&standard);
    bridge.register_requirement(requirement.clone());
    debug!(
        component_id,
        sources = requirement.data_sources.len(),
        "Component requirement registered"
    );
    Ok(requirement)
}

async fn guarded_execute(
    bridge: &DataBridge,
    loop_guard: &LoopProtectionManager,
    component_id: &str,
    source: &str,
) -> EngineResult<ComponentExecutionResult> {
    loop_guard
        .guard(
            EXECUTE_COMPONENT,
            Some(component_id),
            source,
            bridge.execute_registered(component_id),
        )
        .await?
}

async fn run_trigger_worker(
    mut receiver: mpsc::UnboundedReceiver<ConfigChangeEvent>,
    bridge: DataBridge,
    loop_guard: Arc<LoopProtectionManager>,
) {
    while let Some(event) = receiver.recv().await {
        let component_id = event.component_id.as_str();

        if event.section == ConfigSection::DataSource {
            if let Err(e) = register_with(&bridge, component_id, &event.new_config) {
                warn!(component_id, error = %e, "Changed data-source config not registered");
                continue;
            }
        }

        if bridge.requirement(component_id).is_none() {
            debug!(component_id, "Trigger for unregistered component ignored");
            continue;
        }

        bridge.clear_component_cache(component_id);
        match guarded_execute(&bridge, &loop_guard, component_id, "config-change").await {
            Ok(result) => debug!(
                component_id,
                failed = result.failed_sources.len(),
                "Component re-executed after config change"
            ),
            Err(e) => warn!(component_id, error = %e, "Config-change execution rejected"),
        }
    }
    debug!("Execution trigger channel closed");
}
