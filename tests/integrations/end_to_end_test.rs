//! End-to-end component execution through the engine context

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use vista_core::{ComponentDataRequirement, DataSourceDescriptor};
use vista_integration_tests::utils::{engine_with, recording_subscriber};
use vista_test_utils::{counting_source_with_data, CountingKind};

/// Test the cache-hit and cache-clear cycle on one static source
#[tokio::test]
async fn test_static_component_cache_cycle() {
    let counting = Arc::new(CountingKind::new());
    let engine = engine_with(counting.clone());
    let bridge = engine.bridge();

    bridge.register_requirement(
        ComponentDataRequirement::new("card").with_source(counting_source_with_data("sourceA", json!(42))),
    );

    let first = engine.execute_component("card").await.unwrap();
    assert!(first.success);
    assert_eq!(first.data.get("sourceA"), Some(&json!(42)));
    assert_eq!(counting.total_calls(), 1);

    let second = engine.execute_component("card").await.unwrap();
    assert_eq!(second.data, first.data);
    assert_eq!(second.cached_sources, vec!["sourceA".to_string()]);
    assert_eq!(counting.total_calls(), 1);

    bridge.clear_component_cache("card");
    let third = engine.execute_component("card").await.unwrap();
    assert_eq!(third.data, first.data);
    assert_eq!(counting.total_calls(), 2);

    let metrics = bridge.warehouse_metrics();
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.misses, 2);
}

/// Test that the built-in static kind serves `{value: 42}` as 42
#[tokio::test]
async fn test_builtin_static_source() {
    let engine = engine_with(Arc::new(CountingKind::new()));
    engine.bridge().register_requirement(
        ComponentDataRequirement::new("card").with_source(DataSourceDescriptor::static_data("sourceA", json!({"value": 42}))),
    );

    let result = engine.execute_component("card").await.unwrap();
    assert!(result.success);
    assert_eq!(serde_json::Value::Object(result.data), json!({"sourceA": 42}));
}

/// Test every supported config shape registering and executing
#[tokio::test]
async fn test_config_shapes_execute() {
    let engine = engine_with(Arc::new(CountingKind::new()));

    let shapes = vec![
        (
            "simple-editor",
            json!({"dataSources": [{
                "sourceId": "main",
                "dataItems": [{"type": "json", "config": {"jsonContent": "{\"v\": 1}"}}]
            }]}),
            json!({"main": {"v": 1}}),
        ),
        (
            "import-export",
            json!({"dataSourceConfig": {"dataItems": [
                {"type": "static", "config": {"data": {"a": 1}}},
                {"type": "static", "config": {"data": {"b": 2}}}
            ]}}),
            json!({"main": {"a": 1, "b": 2}}),
        ),
        (
            "card-executor",
            json!({"temp": {"type": "static", "data": {"value": 21}, "metadata": {}}}),
            json!({"temp": 21}),
        ),
        (
            "editor-manager",
            json!({"type": "json", "config": {"jsonContent": "{\"points\": [1, 2]}"}, "filterPath": "points"}),
            json!({"main": [1, 2]}),
        ),
        ("generic", json!({"value": 7}), json!({"main": 7})),
    ];

    for (component_id, raw, expected) in shapes {
        engine.register_component(component_id, &raw).unwrap();
        let result = engine.execute_component(component_id).await.unwrap();
        assert!(result.failed_sources.is_empty(), "{} failed: {:?}", component_id, result.failed_sources);
        assert_eq!(serde_json::Value::Object(result.data), expected, "shape {}", component_id);
    }
}

/// Test that subscribers receive the merged map of each execution
#[tokio::test]
async fn test_subscribers_receive_merged_data() {
    let counting = Arc::new(CountingKind::new());
    counting.fail_source("broken");
    let engine = engine_with(counting);
    let (callback, seen) = recording_subscriber();
    engine.bridge().on_data_update("card", callback);

    engine.bridge().register_requirement(
        ComponentDataRequirement::new("card")
            .with_source(counting_source_with_data("ok", json!("fine")))
            .with_source(counting_source_with_data("broken", json!("never")).with_default_value(json!("fallback"))),
    );
    engine.execute_component("card").await.unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["ok"], json!("fine"));
    assert_eq!(seen[0]["broken"], json!("fallback"));
}
