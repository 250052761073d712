// Vista Integration Tests
//
// Cross-crate scenarios driving the engine context end to end

/// Shared test infrastructure
pub mod utils {
    use parking_lot::Mutex;
    use serde_json::{Map, Value};
    use std::sync::Arc;
    use vista_engine::{DataUpdateCallback, EngineConfig, EngineContext};
    use vista_test_utils::{init_test_tracing, test_executor, CountingKind};

    /// Engine over the test executor with default configuration
    pub fn engine_with(counting: Arc<CountingKind>) -> EngineContext {
        engine_with_config(EngineConfig::default(), counting)
    }

    /// Engine over the test executor
    pub fn engine_with_config(config: EngineConfig, counting: Arc<CountingKind>) -> EngineContext {
        init_test_tracing();
        EngineContext::with_executor(config, test_executor(counting)).expect("valid engine config")
    }

    /// Subscriber recording every merged map it receives
    pub fn recording_subscriber() -> (DataUpdateCallback, Arc<Mutex<Vec<Map<String, Value>>>>) {
        let seen: Arc<Mutex<Vec<Map<String, Value>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: DataUpdateCallback = Arc::new(move |_: &str, data: &Map<String, Value>| {
            sink.lock().push(data.clone());
        });
        (callback, seen)
    }
}
