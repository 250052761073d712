//! Loop protection
//!
//! A circuit breaker for call graphs. Every tracked call key keeps a stack
//! of in-flight calls and a rolling history; a key whose depth or call rate
//! crosses the configured thresholds is blacklisted for a cooldown period,
//! after which its history is purged.

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use vista_monitoring::EngineMetrics;

use crate::error::{panic_message, EngineError, EngineResult};

/// Loop protection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopGuardConfig {
    /// Maximum nesting depth per call key
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Rolling window for the frequency check
    #[serde(default = "default_time_window_ms")]
    pub time_window_ms: u64,

    /// Maximum calls per key inside the window
    #[serde(default = "default_max_calls_in_window")]
    pub max_calls_in_window: usize,

    /// How long a key stays blacklisted
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_max_depth() -> usize {
    10
}

fn default_time_window_ms() -> u64 {
    5000
}

fn default_max_calls_in_window() -> usize {
    50
}

fn default_cooldown_ms() -> u64 {
    10_000
}

impl Default for LoopGuardConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            time_window_ms: default_time_window_ms(),
            max_calls_in_window: default_max_calls_in_window(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

/// One recorded call
#[derive(Debug, Clone)]
pub struct CallRecord {
    /// When the call was admitted
    pub timestamp: Instant,
    /// Stack depth at admission
    pub depth: usize,
    /// Trigger path, e.g. `polling`
    pub source: String,
    /// Component the call acts on
    pub component_id: Option<String>,
    /// Free-form action label
    pub action: Option<String>,
}

/// Handle for a call admitted by [`LoopProtectionManager::mark_call_start`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId {
    key: String,
    seq: u64,
}

impl CallId {
    /// Call key this id belongs to
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Loop protection statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopGuardStats {
    /// Calls rejected for any reason
    pub total_calls_blocked: u64,
    /// Threshold breaches plus recovered panics
    pub total_loops_detected: u64,
    /// Keys with at least one call in progress
    pub active_call_keys: usize,
    /// Keys currently blacklisted
    pub blacklisted_count: usize,
    /// Keys with call history
    pub tracked_keys: usize,
}

#[derive(Default)]
struct GuardState {
    call_stacks: HashMap<String, Vec<CallRecord>>,
    history: HashMap<String, VecDeque<CallRecord>>,
    active_counts: HashMap<String, usize>,
    /// Key -> release time
    blacklist: HashMap<String, Instant>,
    total_calls_blocked: u64,
    total_loops_detected: u64,
}

impl GuardState {
    fn release(&mut self, key: &str) {
        self.blacklist.remove(key);
        self.call_stacks.remove(key);
        self.history.remove(key);
        self.active_counts.remove(key);
        info!(call_key = %key, "Released from loop protection blacklist");
    }

    /// Release the key if its cooldown has elapsed; true while still blacklisted
    fn check_blacklist(&mut self, key: &str, now: Instant) -> bool {
        match self.blacklist.get(key) {
            Some(until) if now >= *until => {
                self.release(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    fn depth(&self, key: &str) -> usize {
        self.call_stacks.get(key).map_or(0, Vec::len)
    }
}

/// Detects runaway recursion or call frequency per call key
pub struct LoopProtectionManager {
    config: RwLock<LoopGuardConfig>,
    state: Mutex<GuardState>,
    next_call: AtomicU64,
}

impl LoopProtectionManager {
    /// Create a manager with the given thresholds
    pub fn new(config: LoopGuardConfig) -> Self {
        Self {
            config: RwLock::new(config),
            state: Mutex::new(GuardState::default()),
            next_call: AtomicU64::new(0),
        }
    }

    /// `function:component_id`, or `function` alone
    pub fn call_key(function: &str, component_id: Option<&str>) -> String {
        match component_id {
            Some(id) => format!("{}:{}", function, id),
            None => function.to_string(),
        }
    }

    /// Decide whether a call may proceed. Admitted calls are recorded and
    /// count toward depth until [`Self::mark_call_end`] pops them.
    pub fn should_allow_call(
        &self,
        function: &str,
        component_id: Option<&str>,
        action: Option<&str>,
        source: &str,
    ) -> bool {
        let key = Self::call_key(function, component_id);
        let config = self.config.read().clone();
        let now = Instant::now();
        let mut state = self.state.lock();

        if state.check_blacklist(&key, now) {
            state.total_calls_blocked += 1;
            debug!(call_key = %key, "Blocked blacklisted call");
            return false;
        }

        let depth = state.depth(&key);
        if depth >= config.max_depth {
            let reason = format!("recursion depth reached {}", config.max_depth);
            self.blacklist(&mut state, &key, &reason, now, &config);
            return false;
        }

        let window = Duration::from_millis(config.time_window_ms);
        let history = state.history.entry(key.clone()).or_default();
        while history
            .front()
            .map_or(false, |record| now.saturating_duration_since(record.timestamp) > window)
        {
            history.pop_front();
        }
        if history.len() >= config.max_calls_in_window {
            let reason = format!(
                "{} calls within {}ms",
                history.len(),
                config.time_window_ms
            );
            self.blacklist(&mut state, &key, &reason, now, &config);
            return false;
        }

        let record = CallRecord {
            timestamp: now,
            depth,
            source: source.to_string(),
            component_id: component_id.map(str::to_string),
            action: action.map(str::to_string),
        };
        state.call_stacks.entry(key.clone()).or_default().push(record.clone());
        state.history.entry(key).or_default().push_back(record);
        true
    }

    fn blacklist(&self, state: &mut GuardState, key: &str, reason: &str, now: Instant, config: &LoopGuardConfig) {
        state.total_calls_blocked += 1;
        state.total_loops_detected += 1;
        state
            .blacklist
            .insert(key.to_string(), now + Duration::from_millis(config.cooldown_ms));

        let recent: Vec<String> = state
            .history
            .get(key)
            .map(|h| h.iter().rev().take(5).map(|r| r.source.clone()).collect())
            .unwrap_or_default();

        warn!(
            call_key = %key,
            reason,
            depth = state.depth(key),
            recent_sources = ?recent,
            cooldown_ms = config.cooldown_ms,
            "Loop detected, call key blacklisted"
        );
        EngineMetrics::record_loop_rejection(key, reason);
    }

    /// Admit and bracket a call. `None` means the call was rejected.
    pub fn mark_call_start(&self, function: &str, component_id: Option<&str>, source: &str) -> Option<CallId> {
        if !self.should_allow_call(function, component_id, Some("start"), source) {
            return None;
        }

        let key = Self::call_key(function, component_id);
        let mut state = self.state.lock();
        let active = state.active_counts.entry(key.clone()).or_insert(0);
        *active += 1;
        if *active > 3 {
            debug!(call_key = %key, concurrent = *active, "High call concurrency");
        }

        Some(CallId {
            key,
            seq: self.next_call.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Close a call opened by [`Self::mark_call_start`]
    pub fn mark_call_end(&self, call: &CallId) {
        let mut state = self.state.lock();
        if let Some(active) = state.active_counts.get_mut(&call.key) {
            *active = active.saturating_sub(1);
        }
        if let Some(stack) = state.call_stacks.get_mut(&call.key) {
            stack.pop();
        }
    }

    /// Run `call` between start and end marks, or reject it
    pub async fn guard<Fut, T>(
        &self,
        function: &str,
        component_id: Option<&str>,
        source: &str,
        call: Fut,
    ) -> EngineResult<T>
    where
        Fut: Future<Output = T>,
    {
        let Some(id) = self.mark_call_start(function, component_id, source) else {
            return Err(EngineError::LoopDetected(Self::call_key(function, component_id)));
        };
        let _open = OpenCall { manager: self, id };
        Ok(call.await)
    }

    /// Release every key whose cooldown has elapsed
    pub fn release_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let expired: Vec<String> = state
            .blacklist
            .iter()
            .filter(|(_, until)| now >= **until)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.release(key);
        }
        expired.len()
    }

    /// Treat a catastrophic failure as a detected loop and drop all
    /// in-flight tracking
    pub fn recover_from_overflow(&self, reason: &str) {
        let mut state = self.state.lock();
        state.call_stacks.clear();
        state.active_counts.clear();
        state.total_loops_detected += 1;
        error!(reason, "Catastrophic failure in guarded call, in-flight tracking cleared");
    }

    /// Run `f`, converting a panic into an error after recovery
    pub fn run_protected<T>(&self, f: impl FnOnce() -> T) -> EngineResult<T> {
        std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(|panic| {
            let message = panic_message(panic);
            self.recover_from_overflow(&message);
            EngineError::Panic(message)
        })
    }

    /// Async form of [`Self::run_protected`]
    pub async fn run_protected_async<Fut, T>(&self, fut: Fut) -> EngineResult<T>
    where
        Fut: Future<Output = T>,
    {
        AssertUnwindSafe(fut).catch_unwind().await.map_err(|panic| {
            let message = panic_message(panic);
            self.recover_from_overflow(&message);
            EngineError::Panic(message)
        })
    }

    /// Whether a key is blacklisted right now
    pub fn is_blacklisted(&self, key: &str) -> bool {
        self.state.lock().check_blacklist(key, Instant::now())
    }

    /// Blacklisted keys, sorted
    pub fn blacklisted(&self) -> Vec<String> {
        self.release_expired();
        let mut keys: Vec<String> = self.state.lock().blacklist.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Current statistics
    pub fn stats(&self) -> LoopGuardStats {
        let state = self.state.lock();
        LoopGuardStats {
            total_calls_blocked: state.total_calls_blocked,
            total_loops_detected: state.total_loops_detected,
            active_call_keys: state.active_counts.values().filter(|count| **count > 0).count(),
            blacklisted_count: state.blacklist.len(),
            tracked_keys: state.history.len(),
        }
    }

    /// Current thresholds
    pub fn config(&self) -> LoopGuardConfig {
        self.config.read().clone()
    }

    /// Replace the thresholds; existing history is kept
    pub fn update_config(&self, config: LoopGuardConfig) {
        info!(?config, "Loop protection config updated");
        *self.config.write() = config;
    }

    /// Forget everything, including statistics
    pub fn reset(&self) {
        *self.state.lock() = GuardState::default();
        info!("Loop protection reset");
    }
}

/// Ends its call when dropped, so panics and cancellation unwind the stack
struct OpenCall<'a> {
    manager: &'a LoopProtectionManager,
    id: CallId,
}

impl Drop for OpenCall<'_> {
    fn drop(&mut self) {
        self.manager.mark_call_end(&self.id);
    }
}

impl Default for LoopProtectionManager {
    fn default() -> Self {
        Self::new(LoopGuardConfig::default())
    }
}
