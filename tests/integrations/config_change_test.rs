//! Config changes flowing from the event bus into re-execution

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use vista_engine::{ChangeContext, ChangeSource, ConfigChangeEvent, ConfigSection, EngineConfig, LoopGuardConfig};
use vista_integration_tests::utils::{engine_with, engine_with_config, recording_subscriber};
use vista_test_utils::{CountingKind, COUNTING_KIND};

fn data_source_config(value: i64) -> serde_json::Value {
    json!({
        "dataSources": [{
            "sourceId": "reading",
            "dataItems": [{ "type": COUNTING_KIND, "config": { "data": value } }]
        }]
    })
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Test that a data-source change re-registers and re-executes the component
#[tokio::test(start_paused = true)]
async fn test_data_source_change_reexecutes() {
    let counting = Arc::new(CountingKind::new());
    let engine = engine_with(counting.clone());
    engine.start_trigger_worker().unwrap();
    let (callback, seen) = recording_subscriber();
    engine.bridge().on_data_update("card", callback);

    engine.register_component("card", &data_source_config(1)).unwrap();
    engine.execute_component("card").await.unwrap();

    let delivered = engine
        .event_bus()
        .emit_config_change(
            ConfigChangeEvent::new("card", "gauge", ConfigSection::DataSource, data_source_config(2))
                .with_old_config(data_source_config(1)),
        )
        .await;
    assert!(delivered);
    settle().await;

    assert_eq!(counting.calls("reading"), 2);
    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1]["reading"], json!(2));
    assert_eq!(engine.event_bus().statistics().triggers_sent, 1);
}

/// Test that cosmetic base changes leave data alone and critical ones refetch
#[tokio::test(start_paused = true)]
async fn test_base_changes_only_refetch_on_critical_fields() {
    let counting = Arc::new(CountingKind::new());
    let engine = engine_with(counting.clone());
    engine.start_trigger_worker().unwrap();
    engine.register_component("card", &data_source_config(1)).unwrap();
    engine.execute_component("card").await.unwrap();

    engine
        .event_bus()
        .emit_config_change(
            ConfigChangeEvent::new("card", "gauge", ConfigSection::Base, json!({"title": "Boiler", "deviceId": "d-1"}))
                .with_old_config(json!({"title": "Pump", "deviceId": "d-1"})),
        )
        .await;
    settle().await;
    assert_eq!(counting.calls("reading"), 1);

    engine
        .event_bus()
        .emit_config_change(
            ConfigChangeEvent::new("card", "gauge", ConfigSection::Base, json!({"title": "Boiler", "deviceId": "d-2"}))
                .with_old_config(json!({"title": "Boiler", "deviceId": "d-1"})),
        )
        .await;
    settle().await;
    assert_eq!(counting.calls("reading"), 2);
}

/// Test that system updates opting out of execution never reach handlers
#[tokio::test(start_paused = true)]
async fn test_system_updates_can_opt_out() {
    let counting = Arc::new(CountingKind::new());
    let engine = engine_with(counting.clone());
    engine.start_trigger_worker().unwrap();
    engine.register_component("card", &data_source_config(1)).unwrap();

    let delivered = engine
        .event_bus()
        .emit_config_change(
            ConfigChangeEvent::new("card", "gauge", ConfigSection::Component, json!({"color": "red"}))
                .with_source(ChangeSource::System)
                .with_context(ChangeContext {
                    should_trigger_execution: Some(false),
                    changed_fields: vec!["color".to_string()],
                }),
        )
        .await;
    settle().await;

    assert!(!delivered);
    assert_eq!(counting.total_calls(), 0);
}

/// Test that a config-change storm is cut off by loop protection
#[tokio::test(start_paused = true)]
async fn test_change_storm_is_blacklisted() {
    let counting = Arc::new(CountingKind::new());
    let config = EngineConfig {
        loop_guard: LoopGuardConfig {
            max_calls_in_window: 3,
            ..Default::default()
        },
        ..Default::default()
    };
    let engine = engine_with_config(config, counting.clone());
    engine.start_trigger_worker().unwrap();
    engine.register_component("card", &data_source_config(0)).unwrap();

    for value in 1..=6 {
        engine
            .event_bus()
            .emit_config_change(ConfigChangeEvent::new(
                "card",
                "gauge",
                ConfigSection::DataSource,
                data_source_config(value),
            ))
            .await;
        settle().await;
    }

    assert_eq!(counting.calls("reading"), 3);
    assert_eq!(engine.loop_guard().blacklisted(), vec!["executeComponent:card".to_string()]);

    // the last change is registered even though execution was refused
    let requirement = engine.bridge().requirement("card").unwrap();
    assert_eq!(requirement.data_sources[0].config, json!({"data": 6}));
}
