//! Global polling scheduler
//!
//! One shared timer multiplexes every component's polling cadence. Each
//! tick scans active tasks, orders due ones by ascending interval and fires
//! at most one batch; the rest wait for the next tick. The timer runs only
//! while global polling is enabled and at least one task is active.

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vista_monitoring::EngineMetrics;

use crate::error::{panic_message, EngineError, EngineResult};

/// Polling callback
pub type PollCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Smallest interval a task may use
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Shared timer resolution
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Maximum callbacks fired per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_min_interval_ms() -> u64 {
    1000
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            tick_ms: default_tick_ms(),
            batch_size: default_batch_size(),
        }
    }
}

struct PollingTask {
    id: String,
    component_id: String,
    interval_ms: u64,
    active: bool,
    running: bool,
    last_executed_at: Option<DateTime<Utc>>,
    next_execute_at: Option<Instant>,
    execution_count: u64,
    callback: PollCallback,
}

impl PollingTask {
    fn info(&self, now: Instant) -> PollingTaskInfo {
        PollingTaskInfo {
            id: self.id.clone(),
            component_id: self.component_id.clone(),
            interval_ms: self.interval_ms,
            active: self.active,
            last_executed_at: self.last_executed_at,
            next_execute_in_ms: self
                .next_execute_at
                .filter(|_| self.active)
                .map(|next| next.saturating_duration_since(now).as_millis() as u64),
            execution_count: self.execution_count,
        }
    }
}

/// Read-only view of a task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingTaskInfo {
    /// Task id
    pub id: String,
    /// Owning component
    pub component_id: String,
    /// Polling interval
    pub interval_ms: u64,
    /// Started and not stopped
    pub active: bool,
    /// Last callback start
    pub last_executed_at: Option<DateTime<Utc>>,
    /// Time until the task is next due
    pub next_execute_in_ms: Option<u64>,
    /// Callbacks started so far
    pub execution_count: u64,
}

/// Scheduler statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatistics {
    /// Registered tasks
    pub total_tasks: usize,
    /// Active tasks
    pub active_tasks: usize,
    /// Mean interval over all tasks
    pub average_interval_ms: f64,
    /// Smallest interval, 0 without tasks
    pub min_interval_ms: u64,
    /// Shared timer running
    pub timer_running: bool,
    /// Global switch
    pub global_enabled: bool,
    /// Callbacks started since creation
    pub total_executions: u64,
}

struct SchedulerInner {
    config: SchedulerConfig,
    tasks: Mutex<HashMap<String, PollingTask>>,
    global_enabled: Mutex<bool>,
    timer: Mutex<Option<JoinHandle<()>>>,
    total_executions: Mutex<u64>,
}

struct DueTask {
    id: String,
    callback: PollCallback,
}

impl SchedulerInner {
    /// Claim at most one batch of due tasks, marking them running
    fn claim_due(&self, now: Instant) -> Vec<DueTask> {
        if !*self.global_enabled.lock() {
            return Vec::new();
        }

        let mut tasks = self.tasks.lock();
        let mut due: Vec<&mut PollingTask> = tasks
            .values_mut()
            .filter(|task| task.active && !task.running)
            .filter(|task| task.next_execute_at.map_or(true, |next| now >= next))
            .collect();
        let due_count = due.len();
        due.sort_by_key(|task| task.interval_ms);

        let batch: Vec<DueTask> = due
            .into_iter()
            .take(self.config.batch_size)
            .map(|task| {
                task.running = true;
                task.last_executed_at = Some(Utc::now());
                task.next_execute_at = Some(now + Duration::from_millis(task.interval_ms));
                task.execution_count += 1;
                DueTask {
                    id: task.id.clone(),
                    callback: task.callback.clone(),
                }
            })
            .collect();

        *self.total_executions.lock() += batch.len() as u64;
        EngineMetrics::record_poll_tick(due_count, batch.len());
        batch
    }

    async fn run_batch(self: Arc<Self>, batch: Vec<DueTask>) {
        let runs = batch.into_iter().map(|due| {
            let callback = due.callback;
            let id = due.id;
            async move {
                let outcome = AssertUnwindSafe(async move { callback().await }).catch_unwind().await;
                if let Err(panic) = outcome {
                    warn!(task_id = %id, error = %panic_message(panic), "Polling callback panicked");
                }
                id
            }
        });

        let finished = join_all(runs).await;

        let mut tasks = self.tasks.lock();
        for id in finished {
            if let Some(task) = tasks.get_mut(&id) {
                task.running = false;
            }
        }
    }

    fn has_active_tasks(&self) -> bool {
        self.tasks.lock().values().any(|task| task.active)
    }
}

/// Single-timer polling scheduler. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct GlobalPollingScheduler {
    inner: Arc<SchedulerInner>,
}

impl GlobalPollingScheduler {
    /// Create a scheduler; the timer starts with the first active task
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                tasks: Mutex::new(HashMap::new()),
                global_enabled: Mutex::new(true),
                timer: Mutex::new(None),
                total_executions: Mutex::new(0),
            }),
        }
    }

    /// Add a task. Intervals below the configured minimum are raised to it.
    pub fn add_task(&self, component_id: &str, interval_ms: u64, callback: PollCallback, auto_start: bool) -> String {
        let interval_ms = self.clamp_interval(component_id, interval_ms);
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(9).collect();
        let id = format!(
            "polling_{}_{}_{}",
            component_id,
            Utc::now().timestamp_millis(),
            suffix
        );

        let now = Instant::now();
        let task = PollingTask {
            id: id.clone(),
            component_id: component_id.to_string(),
            interval_ms,
            active: auto_start,
            running: false,
            last_executed_at: None,
            next_execute_at: auto_start.then(|| now + Duration::from_millis(interval_ms)),
            execution_count: 0,
            callback,
        };
        self.inner.tasks.lock().insert(id.clone(), task);
        info!(task_id = %id, component_id, interval_ms, auto_start, "Polling task added");

        if auto_start {
            self.ensure_timer();
        }
        id
    }

    fn clamp_interval(&self, component_id: &str, interval_ms: u64) -> u64 {
        let min = self.inner.config.min_interval_ms;
        if interval_ms < min {
            warn!(component_id, interval_ms, min_interval_ms = min, "Polling interval raised to minimum");
            min
        } else {
            interval_ms
        }
    }

    /// Activate a task; it first fires one interval from now
    pub fn start_task(&self, task_id: &str) -> EngineResult<()> {
        {
            let mut tasks = self.inner.tasks.lock();
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
            if !task.active {
                task.active = true;
                task.next_execute_at = Some(Instant::now() + Duration::from_millis(task.interval_ms));
                debug!(task_id, "Polling task started");
            }
        }
        self.ensure_timer();
        Ok(())
    }

    /// Deactivate a task, keeping it registered
    pub fn stop_task(&self, task_id: &str) -> EngineResult<()> {
        {
            let mut tasks = self.inner.tasks.lock();
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
            task.active = false;
            task.next_execute_at = None;
            debug!(task_id, "Polling task stopped");
        }
        self.stop_timer_if_idle();
        Ok(())
    }

    /// Remove a task
    pub fn remove_task(&self, task_id: &str) -> bool {
        let removed = self.inner.tasks.lock().remove(task_id).is_some();
        if removed {
            debug!(task_id, "Polling task removed");
            self.stop_timer_if_idle();
        }
        removed
    }

    fn component_task_ids(&self, component_id: &str) -> Vec<String> {
        self.inner
            .tasks
            .lock()
            .values()
            .filter(|task| task.component_id == component_id)
            .map(|task| task.id.clone())
            .collect()
    }

    /// Start every task of a component
    pub fn start_component_tasks(&self, component_id: &str) -> usize {
        let ids = self.component_task_ids(component_id);
        ids.iter().filter(|id| self.start_task(id).is_ok()).count()
    }

    /// Stop every task of a component
    pub fn stop_component_tasks(&self, component_id: &str) -> usize {
        let ids = self.component_task_ids(component_id);
        ids.iter().filter(|id| self.stop_task(id).is_ok()).count()
    }

    /// Remove every task of a component
    pub fn remove_component_tasks(&self, component_id: &str) -> usize {
        let ids = self.component_task_ids(component_id);
        ids.iter().filter(|id| self.remove_task(id)).count()
    }

    /// Change a task's interval; an active task is rescheduled from now
    pub fn update_task_interval(&self, task_id: &str, interval_ms: u64) -> EngineResult<()> {
        let mut tasks = self.inner.tasks.lock();
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
        let interval_ms = self.clamp_interval(&task.component_id, interval_ms);
        task.interval_ms = interval_ms;
        if task.active {
            task.next_execute_at = Some(Instant::now() + Duration::from_millis(interval_ms));
        }
        debug!(task_id, interval_ms, "Polling interval updated");
        Ok(())
    }

    /// Turn the master switch on; due tasks fire on the next tick
    pub fn enable_global_polling(&self) {
        *self.inner.global_enabled.lock() = true;
        info!("Global polling enabled");
        self.ensure_timer();
    }

    /// Turn the master switch off. Task state is kept.
    pub fn disable_global_polling(&self) {
        *self.inner.global_enabled.lock() = false;
        info!("Global polling disabled");
        self.stop_timer();
    }

    /// Master switch state
    pub fn is_global_polling_enabled(&self) -> bool {
        *self.inner.global_enabled.lock()
    }

    /// Tasks of one component
    pub fn tasks_by_component(&self, component_id: &str) -> Vec<PollingTaskInfo> {
        self.collect_tasks(|task| task.component_id == component_id)
    }

    /// Every task
    pub fn all_tasks(&self) -> Vec<PollingTaskInfo> {
        self.collect_tasks(|_| true)
    }

    /// Active tasks
    pub fn active_tasks(&self) -> Vec<PollingTaskInfo> {
        self.collect_tasks(|task| task.active)
    }

    fn collect_tasks(&self, predicate: impl Fn(&PollingTask) -> bool) -> Vec<PollingTaskInfo> {
        let now = Instant::now();
        let mut tasks: Vec<PollingTaskInfo> = self
            .inner
            .tasks
            .lock()
            .values()
            .filter(|task| predicate(task))
            .map(|task| task.info(now))
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        tasks
    }

    /// Deactivate every task
    pub fn stop_all_tasks(&self) {
        for task in self.inner.tasks.lock().values_mut() {
            task.active = false;
            task.next_execute_at = None;
        }
        self.stop_timer();
    }

    /// Remove every task
    pub fn clear_all_tasks(&self) {
        self.inner.tasks.lock().clear();
        self.stop_timer();
    }

    /// Counters snapshot
    pub fn statistics(&self) -> SchedulerStatistics {
        let tasks = self.inner.tasks.lock();
        let intervals: Vec<u64> = tasks.values().map(|task| task.interval_ms).collect();
        let average_interval_ms = if intervals.is_empty() {
            0.0
        } else {
            intervals.iter().sum::<u64>() as f64 / intervals.len() as f64
        };

        SchedulerStatistics {
            total_tasks: tasks.len(),
            active_tasks: tasks.values().filter(|task| task.active).count(),
            average_interval_ms,
            min_interval_ms: intervals.iter().copied().min().unwrap_or(0),
            timer_running: self.is_timer_running(),
            global_enabled: self.is_global_polling_enabled(),
            total_executions: *self.inner.total_executions.lock(),
        }
    }

    /// Whether the shared timer task is alive
    pub fn is_timer_running(&self) -> bool {
        self.inner
            .timer
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Run one scan now and wait for the fired callbacks. Returns how many fired.
    pub async fn tick(&self) -> usize {
        let batch = self.inner.claim_due(Instant::now());
        let fired = batch.len();
        if fired > 0 {
            self.inner.clone().run_batch(batch).await;
        }
        fired
    }

    fn ensure_timer(&self) {
        if !self.is_global_polling_enabled() || !self.inner.has_active_tasks() {
            return;
        }

        let mut timer = self.inner.timer.lock();
        if timer.as_ref().map_or(false, |handle| !handle.is_finished()) {
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!("No tokio runtime available, polling timer not started");
            return;
        };

        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        let period = Duration::from_millis(self.inner.config.tick_ms.max(1));

        *timer = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let batch = inner.claim_due(Instant::now());
                if !batch.is_empty() {
                    tokio::spawn(inner.run_batch(batch));
                }
            }
        }));
        info!(tick_ms = period.as_millis() as u64, "Polling timer started");
    }

    fn stop_timer(&self) {
        if let Some(handle) = self.inner.timer.lock().take() {
            handle.abort();
            info!("Polling timer stopped");
        }
    }

    fn stop_timer_if_idle(&self) {
        if !self.inner.has_active_tasks() {
            self.stop_timer();
        }
    }

    /// Stop the timer and drop every task
    pub fn destroy(&self) {
        self.clear_all_tasks();
        info!("Polling scheduler destroyed");
    }
}

impl Default for GlobalPollingScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
