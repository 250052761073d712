//! Engine context wiring

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;
use vista_engine::{EngineConfig, EngineContext, EngineError, LoopGuardConfig};
use vista_test_utils::{init_test_tracing, test_executor, CountingKind, COUNTING_KIND};

fn context_with(config: EngineConfig, counting: Arc<CountingKind>) -> EngineContext {
    init_test_tracing();
    EngineContext::with_executor(config, test_executor(counting)).unwrap()
}

fn card_config() -> serde_json::Value {
    json!({
        "dataSources": [{
            "sourceId": "readings",
            "dataItems": [{ "type": COUNTING_KIND, "config": {} }]
        }]
    })
}

/// Test that a raw editor config is normalized, registered and executed
#[tokio::test]
async fn test_register_and_execute_component() {
    let counting = Arc::new(CountingKind::new());
    let engine = context_with(EngineConfig::default(), counting.clone());

    let requirement = assert_ok!(engine.register_component("card", &card_config()));
    assert_eq!(requirement.data_sources.len(), 1);
    assert_eq!(requirement.data_sources[0].id, "readings");

    let result = assert_ok!(engine.execute_component("card").await);
    assert_eq!(result.data["readings"], json!({"sourceId": "readings", "call": 1}));
    assert_eq!(counting.calls("readings"), 1);

    assert!(matches!(
        engine.execute_component("missing").await,
        Err(EngineError::ComponentNotFound(_))
    ));
}

/// Test that invalid configuration is rejected at construction
#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let mut config = EngineConfig::default();
    config.scheduler.batch_size = 0;

    let result = EngineContext::with_executor(config, test_executor(Arc::new(CountingKind::new())));
    assert!(matches!(result, Err(EngineError::ConfigError(_))));
}

/// Test that manual executions run through loop protection
#[tokio::test]
async fn test_manual_execution_is_loop_guarded() {
    let config = EngineConfig {
        loop_guard: LoopGuardConfig {
            max_calls_in_window: 3,
            ..Default::default()
        },
        ..Default::default()
    };
    let engine = context_with(config, Arc::new(CountingKind::new()));
    engine.register_component("card", &card_config()).unwrap();

    for _ in 0..3 {
        engine.execute_component("card").await.unwrap();
    }
    let rejected = engine.execute_component("card").await;

    assert!(matches!(rejected, Err(EngineError::LoopDetected(key)) if key == "executeComponent:card"));
    assert_eq!(engine.loop_guard().blacklisted(), vec!["executeComponent:card".to_string()]);
}

/// Test that polling drives bridge executions until the component is removed
#[tokio::test(start_paused = true)]
async fn test_polling_executes_registered_component() {
    let counting = Arc::new(CountingKind::new());
    let mut config = EngineConfig::default();
    config.warehouse.default_ttl_ms = 500;
    let engine = context_with(config, counting.clone());

    assert!(matches!(
        engine.start_polling("card", 1000),
        Err(EngineError::ComponentNotFound(_))
    ));

    engine.register_component("card", &card_config()).unwrap();
    let task_id = engine.start_polling("card", 1000).unwrap();
    assert!(task_id.starts_with("polling_card_"));

    tokio::time::sleep(Duration::from_millis(3100)).await;
    assert_eq!(counting.calls("readings"), 3);

    assert!(engine.remove_component("card"));
    assert!(engine.scheduler().all_tasks().is_empty());
    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert_eq!(counting.calls("readings"), 3);
}

/// Test the debug snapshot shape and shutdown
#[tokio::test]
async fn test_debug_snapshot_and_shutdown() {
    let engine = context_with(EngineConfig::default(), Arc::new(CountingKind::new()));
    engine.register_component("card", &card_config()).unwrap();
    engine.execute_component("card").await.unwrap();
    engine.start_trigger_worker().unwrap();

    let snapshot = engine.debug_snapshot();
    for key in ["bridge", "storage", "scheduler", "pollingTasks", "eventBus", "loopGuard", "supportedKinds"] {
        assert!(snapshot.get(key).is_some(), "missing {}", key);
    }
    assert_eq!(snapshot["bridge"]["registeredComponents"], json!(1));
    assert_eq!(snapshot["storage"]["totalDataSources"], json!(1));

    engine.shutdown().await;
    assert!(engine.bridge().requirement("card").is_none());
    assert_eq!(engine.event_bus().handler_count(), 0);
    assert!(!engine.scheduler().is_timer_running());
}
