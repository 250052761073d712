//! Data bridge behavior against fake fetch kinds

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use vista_core::{ComponentDataRequirement, DataSourceDescriptor, MergeStrategy};
use vista_engine::{DataBridge, DataUpdateCallback};
use vista_test_utils::{
    counting_source, counting_source_with_data, init_test_tracing, panicking_source, test_executor, CountingKind,
};
use vista_warehouse::{DataWarehouse, WarehouseConfig};

fn bridge_with(counting: Arc<CountingKind>) -> DataBridge {
    init_test_tracing();
    DataBridge::new(test_executor(counting), Arc::new(DataWarehouse::new(WarehouseConfig::default())))
}

fn three_sources() -> ComponentDataRequirement {
    ComponentDataRequirement::new("card")
        .with_source(counting_source_with_data("first", json!(1)))
        .with_source(counting_source_with_data("second", json!(2)))
        .with_source(counting_source_with_data("third", json!(3)))
}

/// Test that concurrent executions of one component share a single fetch
#[tokio::test(start_paused = true)]
async fn test_concurrent_executions_share_one_fetch() {
    let counting = Arc::new(CountingKind::new().with_delay(Duration::from_millis(100)));
    let bridge = bridge_with(counting.clone());
    let requirement = ComponentDataRequirement::new("card")
        .with_source(counting_source("a"))
        .with_source(counting_source("b"));

    let (first, second) = tokio::join!(
        bridge.execute_component(&requirement),
        bridge.execute_component(&requirement)
    );

    assert_eq!(counting.calls("a"), 1);
    assert_eq!(counting.calls("b"), 1);
    assert_eq!(first, second);

    let stats = bridge.stats();
    assert_eq!(stats.executions, 1);
    assert_eq!(stats.joined_executions, 1);
    assert_eq!(stats.in_flight, 0);
}

/// Test that different components do not join each other's executions
#[tokio::test(start_paused = true)]
async fn test_different_components_execute_independently() {
    let counting = Arc::new(CountingKind::new().with_delay(Duration::from_millis(100)));
    let bridge = bridge_with(counting.clone());
    let left = ComponentDataRequirement::new("left").with_source(counting_source("shared"));
    let right = ComponentDataRequirement::new("right").with_source(counting_source("shared"));

    tokio::join!(bridge.execute_component(&left), bridge.execute_component(&right));

    assert_eq!(counting.calls("shared"), 2);
    assert_eq!(bridge.stats().joined_executions, 0);
}

/// Test that entries expire after the configured cache expiry
#[tokio::test(start_paused = true)]
async fn test_cache_expiry_controls_refetch() {
    let counting = Arc::new(CountingKind::new());
    let bridge = bridge_with(counting.clone());
    bridge.set_cache_expiry(50);
    let requirement = ComponentDataRequirement::new("card").with_source(counting_source("a"));

    let first = bridge.execute_component(&requirement).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = bridge.execute_component(&requirement).await;
    assert_eq!(counting.calls("a"), 1);
    assert!(first.cached_sources.is_empty());
    assert_eq!(second.cached_sources, vec!["a".to_string()]);
    assert_eq!(first.data, second.data);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let third = bridge.execute_component(&requirement).await;
    assert_eq!(counting.calls("a"), 2);
    assert_eq!(third.data["a"], json!({"sourceId": "a", "call": 2}));
}

/// Test that one failing source leaves the others intact
#[tokio::test]
async fn test_partial_failure_is_isolated() {
    let counting = Arc::new(CountingKind::new());
    counting.fail_source("second");
    let bridge = bridge_with(counting);

    let result = bridge.execute_component(&three_sources()).await;

    assert!(result.success);
    assert_eq!(result.failed_sources, vec!["second".to_string()]);
    let keys: Vec<&String> = result.data.keys().collect();
    assert_eq!(keys, vec!["first", "second", "third"]);
    assert_eq!(result.data["first"], json!(1));
    assert_eq!(result.data["second"], Value::Null);
    assert_eq!(result.data["third"], json!(3));
}

/// Test that failed sources fall back to the last good value, then the default
#[tokio::test(start_paused = true)]
async fn test_failed_source_falls_back() {
    let counting = Arc::new(CountingKind::new());
    let bridge = bridge_with(counting.clone());
    bridge.set_cache_expiry(50);
    let requirement = ComponentDataRequirement::new("card")
        .with_source(counting_source_with_data("live", json!({"temp": 20})))
        .with_source(counting_source("fresh").with_default_value(json!({"temp": 0})));

    bridge.execute_component(&requirement).await;

    counting.fail_source("live");
    counting.fail_source("fresh");
    bridge.clear_component_cache("card");
    let result = bridge.execute_component(&requirement).await;

    // cleared entries leave no last good value
    assert_eq!(result.data["live"], Value::Null);
    assert_eq!(result.data["fresh"], json!({"temp": 0}));

    counting.recover_source("live");
    bridge.execute_component(&requirement).await;
    counting.fail_source("live");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stale = bridge.execute_component(&requirement).await;
    assert_eq!(stale.data["live"], json!({"temp": 20}));
    assert_eq!(stale.failed_sources, vec!["live".to_string(), "fresh".to_string()]);
}

/// Test that panicking kinds and disabled sources count as failures
#[tokio::test]
async fn test_panics_and_disabled_sources_are_failures() {
    let bridge = bridge_with(Arc::new(CountingKind::new()));
    let requirement = ComponentDataRequirement::new("card")
        .with_source(panicking_source("boom"))
        .with_source(counting_source("off").disabled())
        .with_source(DataSourceDescriptor::static_data("ok", json!({"value": 42})));

    let result = bridge.execute_component(&requirement).await;

    assert_eq!(result.failed_sources, vec!["boom".to_string(), "off".to_string()]);
    assert_eq!(result.data["ok"], json!(42));
}

/// Test that grouped sources merge under their group key
#[tokio::test]
async fn test_grouped_sources_merge() {
    let bridge = bridge_with(Arc::new(CountingKind::new()));
    let requirement = ComponentDataRequirement::new("card")
        .with_source(counting_source_with_data("p_0", json!({"a": 1})).in_group("props", MergeStrategy::Object))
        .with_source(counting_source_with_data("single", json!("x")))
        .with_source(counting_source_with_data("p_1", json!({"b": 2})).in_group("props", MergeStrategy::Object))
        .with_source(counting_source_with_data("s_0", json!([1])).in_group("series", MergeStrategy::Array))
        .with_source(counting_source_with_data("s_1", json!([2, 3])).in_group("series", MergeStrategy::Array));

    let result = bridge.execute_component(&requirement).await;

    let mut expected = Map::new();
    expected.insert("props".to_string(), json!({"a": 1, "b": 2}));
    expected.insert("single".to_string(), json!("x"));
    expected.insert("series".to_string(), json!([1, 2, 3]));
    assert_eq!(result.data, expected);
}

/// Test that subscribers see every execution until they unsubscribe
#[tokio::test]
async fn test_subscribers_are_notified_and_isolated() {
    let bridge = bridge_with(Arc::new(CountingKind::new()));
    let requirement = ComponentDataRequirement::new("card").with_source(counting_source_with_data("a", json!(7)));
    let seen: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));

    let per_component = {
        let seen = seen.clone();
        let callback: DataUpdateCallback = Arc::new(move |component_id: &str, data: &Map<String, Value>| {
            seen.lock().push((component_id.to_string(), data["a"].clone()));
        });
        bridge.on_data_update("card", callback)
    };
    let global = bridge.on_any_update(Arc::new(|_: &str, _: &Map<String, Value>| panic!("subscriber failed")));
    bridge.on_data_update("other", Arc::new(|_: &str, _: &Map<String, Value>| panic!("wrong component")));
    assert_eq!(bridge.stats().active_callbacks, 3);

    bridge.execute_component(&requirement).await;
    assert_eq!(*seen.lock(), vec![("card".to_string(), json!(7))]);

    assert!(bridge.unsubscribe(per_component));
    assert!(bridge.unsubscribe(global));
    assert!(!bridge.unsubscribe(global));
    bridge.execute_component(&requirement).await;
    assert_eq!(seen.lock().len(), 1);
}

/// Test the requirement registry and cache invalidation on change
#[tokio::test]
async fn test_registered_requirements() {
    let counting = Arc::new(CountingKind::new());
    let bridge = bridge_with(counting.clone());
    let requirement = ComponentDataRequirement::new("card").with_source(counting_source("a"));

    assert!(matches!(
        bridge.execute_registered("card").await,
        Err(vista_engine::EngineError::ComponentNotFound(_))
    ));

    assert!(bridge.register_requirement(requirement.clone()).is_none());
    bridge.execute_registered("card").await.unwrap();
    bridge.execute_registered("card").await.unwrap();
    assert_eq!(counting.calls("a"), 1);

    // re-registering the same requirement keeps the cache
    bridge.register_requirement(requirement.clone());
    bridge.execute_registered("card").await.unwrap();
    assert_eq!(counting.calls("a"), 1);

    bridge.register_requirement(requirement.with_source(counting_source("b")));
    let result = bridge.execute_registered("card").await.unwrap();
    assert_eq!(counting.calls("a"), 2);
    assert_eq!(result.data.len(), 2);
    assert!(bridge.get_component_data("card").is_some());

    assert!(bridge.remove_component("card"));
    assert!(bridge.requirement("card").is_none());
    assert!(bridge.get_component_data("card").is_none());
}

/// Test that storage statistics reflect cached components
#[tokio::test]
async fn test_storage_stats_and_destroy() {
    let bridge = bridge_with(Arc::new(CountingKind::new()));
    bridge.execute_component(&three_sources()).await;

    let storage = bridge.storage_stats();
    assert_eq!(storage.total_components, 1);
    assert_eq!(storage.total_data_sources, 3);
    assert_eq!(storage.component_stats["card"].source_count, 3);

    let metrics = bridge.warehouse_metrics();
    assert_eq!(metrics.misses, 3);
    assert_eq!(metrics.item_count, 3);

    bridge.destroy();
    assert_eq!(bridge.storage_stats().total_components, 0);
    assert_eq!(bridge.stats().active_callbacks, 0);
}

/// Test that replacing a requirement mid-flight never serves the old config
#[tokio::test(start_paused = true)]
async fn test_replaced_requirement_does_not_join_or_cache_old_run() {
    let counting = Arc::new(CountingKind::new().with_delay(Duration::from_millis(100)));
    let bridge = bridge_with(counting.clone());
    let old = ComponentDataRequirement::new("card").with_source(counting_source_with_data("s", json!(1)));
    let new = ComponentDataRequirement::new("card").with_source(counting_source_with_data("s", json!(2)));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let callback: DataUpdateCallback = Arc::new(move |_: &str, data: &Map<String, Value>| {
        recorder.lock().push(data["s"].clone());
    });
    bridge.on_data_update("card", callback);

    bridge.register_requirement(old.clone());
    let running = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.execute_component(&old).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    bridge.register_requirement(new.clone());
    let second = bridge.execute_component(&new).await;
    let first = running.await.unwrap();
    let third = bridge.execute_component(&new).await;

    assert_eq!(first.data["s"], json!(1));
    assert_eq!(second.data["s"], json!(2));
    assert_eq!(third.data["s"], json!(2));
    assert_eq!(third.cached_sources, vec!["s".to_string()]);
    assert_eq!(counting.calls("s"), 2);
    assert_eq!(*seen.lock(), vec![json!(2), json!(2)]);

    let stats = bridge.stats();
    assert_eq!(stats.joined_executions, 0);
    assert_eq!(stats.in_flight, 0);
}

/// Test that clearing the cache mid-flight starts a fresh execution
#[tokio::test(start_paused = true)]
async fn test_cache_clear_during_execution_is_not_overwritten() {
    let counting = Arc::new(CountingKind::new().with_delay(Duration::from_millis(100)));
    let bridge = bridge_with(counting.clone());
    let requirement = ComponentDataRequirement::new("card").with_source(counting_source("a"));

    let running = {
        let bridge = bridge.clone();
        let requirement = requirement.clone();
        tokio::spawn(async move { bridge.execute_component(&requirement).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    bridge.clear_component_cache("card");

    let fresh = bridge.execute_component(&requirement).await;
    running.await.unwrap();

    assert_eq!(counting.calls("a"), 2);
    assert_eq!(fresh.data["a"]["call"], json!(2));
    assert_eq!(bridge.get_component_data("card").unwrap()["a"]["call"], json!(2));
}
