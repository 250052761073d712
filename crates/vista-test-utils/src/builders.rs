//! Descriptor and executor builders

use serde_json::{json, Value};
use std::sync::Arc;
use vista_core::DataSourceDescriptor;
use vista_fetch::{JsonKind, StaticKind, UnifiedExecutor};

use crate::fakes::{CountingKind, PanickingKind, COUNTING_KIND, PANICKING_KIND};

/// Descriptor served by [`CountingKind`]
pub fn counting_source(id: &str) -> DataSourceDescriptor {
    DataSourceDescriptor::new(id, COUNTING_KIND).with_config(json!({}))
}

/// Descriptor served by [`CountingKind`] returning fixed data
pub fn counting_source_with_data(id: &str, data: Value) -> DataSourceDescriptor {
    DataSourceDescriptor::new(id, COUNTING_KIND).with_config(json!({ "data": data }))
}

/// Descriptor served by [`PanickingKind`]
pub fn panicking_source(id: &str) -> DataSourceDescriptor {
    DataSourceDescriptor::new(id, PANICKING_KIND).with_config(json!({}))
}

/// Executor without network kinds: static, json, the given counting kind
/// and a panicking kind
pub fn test_executor(counting: Arc<CountingKind>) -> Arc<UnifiedExecutor> {
    let executor = UnifiedExecutor::new();
    executor.register(Arc::new(StaticKind));
    executor.register(Arc::new(JsonKind));
    executor.register(counting);
    executor.register(Arc::new(PanickingKind));
    Arc::new(executor)
}
