//! Fake fetch kinds

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use vista_core::{DataSourceDescriptor, ErrorCode};
use vista_fetch::{FetchError, FetchKind, FetchKindBase, FetchResult};

/// Kind name of [`CountingKind`]
pub const COUNTING_KIND: &str = "counting";

/// Kind name of [`PanickingKind`]
pub const PANICKING_KIND: &str = "panicking";

/// Records every fetch per source id. Returns `config.data` when present,
/// otherwise `{"sourceId": id, "call": n}`. Sources can be told to fail and
/// every fetch can be delayed.
#[derive(Default)]
pub struct CountingKind {
    delay: Option<Duration>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl CountingKind {
    /// Kind with no delay and no failing sources
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every fetch
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make fetches of `source_id` fail until recovered
    pub fn fail_source(&self, source_id: &str) {
        self.failing.lock().insert(source_id.to_string());
    }

    /// Let fetches of `source_id` succeed again
    pub fn recover_source(&self, source_id: &str) {
        self.failing.lock().remove(source_id);
    }

    /// Fetches started for one source
    pub fn calls(&self, source_id: &str) -> usize {
        self.calls.lock().get(source_id).copied().unwrap_or(0)
    }

    /// Fetches started across all sources
    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    /// Forget recorded calls
    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }
}

impl FetchKindBase for CountingKind {
    fn kind(&self) -> &str {
        COUNTING_KIND
    }
}

#[async_trait]
impl FetchKind for CountingKind {
    async fn fetch(&self, descriptor: &DataSourceDescriptor) -> FetchResult<Value> {
        let call = {
            let mut calls = self.calls.lock();
            let count = calls.entry(descriptor.id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().contains(&descriptor.id) {
            return Err(FetchError::new(
                ErrorCode::HttpRequestFailed,
                format!("source '{}' is configured to fail", descriptor.id),
            ));
        }

        Ok(descriptor
            .config
            .get("data")
            .cloned()
            .unwrap_or_else(|| json!({"sourceId": descriptor.id, "call": call})))
    }
}

/// Panics on every fetch
#[derive(Debug, Default)]
pub struct PanickingKind;

impl FetchKindBase for PanickingKind {
    fn kind(&self) -> &str {
        PANICKING_KIND
    }
}

#[async_trait]
impl FetchKind for PanickingKind {
    async fn fetch(&self, descriptor: &DataSourceDescriptor) -> FetchResult<Value> {
        panic!("fetch of '{}' blew up", descriptor.id)
    }
}
