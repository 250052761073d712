//! Unified fetch executor
//!
//! Dispatches a [`DataSourceDescriptor`] to the [`FetchKind`] registered
//! under its kind name, applies the transform pipeline and folds every
//! outcome, including panics inside a kind, into an [`ExecutionResult`].

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vista_core::{DataSourceDescriptor, ErrorCode, ExecutionResult};

use crate::error::FetchResult;
use crate::kinds::{builtin_kinds, HttpTransport, ReqwestTransport};
use crate::transform::apply_transform;

/// Non-async half of a fetch kind, usable without awaiting
pub trait FetchKindBase: Send + Sync {
    /// Kind name this implementation is registered under
    fn kind(&self) -> &str;
}

/// One pluggable data-source kind
#[async_trait]
pub trait FetchKind: FetchKindBase {
    /// Fetch raw data for a descriptor. Transforms are applied by the executor.
    async fn fetch(&self, descriptor: &DataSourceDescriptor) -> FetchResult<Value>;

    /// Report config defects without fetching
    fn validate(&self, _descriptor: &DataSourceDescriptor) -> Vec<String> {
        Vec::new()
    }

    /// Release long-lived resources
    async fn cleanup(&self) {}
}

/// Registry of fetch kinds plus the dispatcher over them
pub struct UnifiedExecutor {
    kinds: DashMap<String, Arc<dyn FetchKind>>,
}

impl UnifiedExecutor {
    /// Create an executor with no kinds registered
    pub fn new() -> Self {
        Self {
            kinds: DashMap::new(),
        }
    }

    /// Create an executor with every built-in kind, using `transport` for HTTP
    pub fn with_builtin_kinds(transport: Arc<dyn HttpTransport>) -> Self {
        let executor = Self::new();
        for kind in builtin_kinds(transport) {
            executor.register(kind);
        }
        executor
    }

    /// Register a kind, returning the one it replaced
    pub fn register(&self, kind: Arc<dyn FetchKind>) -> Option<Arc<dyn FetchKind>> {
        let name = kind.kind().to_string();
        debug!(kind = %name, "Registering fetch kind");
        self.kinds.insert(name, kind)
    }

    /// Remove a kind
    pub fn unregister(&self, name: &str) -> bool {
        self.kinds.remove(name).is_some()
    }

    /// Registered kind names, sorted
    pub fn supported_kinds(&self) -> Vec<String> {
        let mut names: Vec<String> = self.kinds.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Check a descriptor without fetching it
    pub fn validate_descriptor(&self, descriptor: &DataSourceDescriptor) -> Vec<String> {
        let mut errors = Vec::new();

        if descriptor.id.trim().is_empty() {
            errors.push("data source id is empty".to_string());
        }

        match self.kind_for(&descriptor.kind) {
            Some(kind) => errors.extend(kind.validate(descriptor)),
            None => errors.push(format!("unsupported data source kind: {}", descriptor.kind)),
        }

        if let Err(e) = descriptor.effective_transform() {
            errors.push(e.to_string());
        }

        errors
    }

    /// Fetch and transform one descriptor. Never fails; failures are data.
    pub async fn execute(&self, descriptor: &DataSourceDescriptor) -> ExecutionResult {
        let started = Instant::now();
        let elapsed_ms = || started.elapsed().as_millis() as u64;

        if !descriptor.enabled {
            return ExecutionResult::failure(
                &descriptor.id,
                ErrorCode::DataSourceDisabled,
                format!("data source '{}' is disabled", descriptor.id),
                0,
            );
        }

        let Some(kind) = self.kind_for(&descriptor.kind) else {
            warn!(source_id = %descriptor.id, kind = %descriptor.kind, "Unsupported data source kind");
            return ExecutionResult::failure(
                &descriptor.id,
                ErrorCode::UnsupportedDataSource,
                format!("unsupported data source kind: {}", descriptor.kind),
                0,
            );
        };

        let fetched = AssertUnwindSafe(kind.fetch(descriptor)).catch_unwind().await;

        let outcome = match fetched {
            Err(panic) => Err((ErrorCode::ExecutorException, panic_message(panic))),
            Ok(Err(e)) => Err((e.code, e.message)),
            Ok(Ok(data)) => descriptor
                .effective_transform()
                .and_then(|transform| match transform {
                    Some(transform) => apply_transform(data, &transform),
                    None => Ok(data),
                })
                .map_err(|e| (ErrorCode::TransformFailed, e.to_string())),
        };

        match outcome {
            Ok(data) => {
                let result = ExecutionResult::ok(&descriptor.id, data, elapsed_ms());
                debug!(
                    source_id = %descriptor.id,
                    kind = %descriptor.kind,
                    response_time_ms = result.metadata.response_time_ms,
                    data_size_bytes = result.metadata.data_size_bytes,
                    "Data source executed"
                );
                result
            }
            Err((code, message)) => {
                warn!(
                    source_id = %descriptor.id,
                    kind = %descriptor.kind,
                    error_code = %code,
                    error = %message,
                    "Data source execution failed"
                );
                ExecutionResult::failure(&descriptor.id, code, message, elapsed_ms())
            }
        }
    }

    /// Execute descriptors concurrently. Output order matches input order
    /// and one failure never affects the others.
    pub async fn execute_multiple(&self, descriptors: &[DataSourceDescriptor]) -> Vec<ExecutionResult> {
        join_all(descriptors.iter().map(|descriptor| self.execute(descriptor))).await
    }

    /// Release resources held by every registered kind
    pub async fn cleanup(&self) {
        let kinds: Vec<Arc<dyn FetchKind>> = self.kinds.iter().map(|entry| entry.value().clone()).collect();
        join_all(kinds.iter().map(|kind| kind.cleanup())).await;
        info!(kinds = kinds.len(), "Fetch kinds cleaned up");
    }

    fn kind_for(&self, name: &str) -> Option<Arc<dyn FetchKind>> {
        self.kinds.get(name).map(|entry| entry.value().clone())
    }
}

impl Default for UnifiedExecutor {
    fn default() -> Self {
        Self::with_builtin_kinds(Arc::new(ReqwestTransport::new()))
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("fetch kind panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("fetch kind panicked: {}", msg)
    } else {
        "fetch kind panicked".to_string()
    }
}
