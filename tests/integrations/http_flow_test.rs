//! HTTP sources through the full engine against a real server

use serde_json::json;
use std::time::Duration;
use vista_engine::{EngineConfig, EngineContext};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn telemetry_config(server: &MockServer) -> serde_json::Value {
    json!({
        "dataSources": [{
            "sourceId": "telemetry",
            "dataItems": [{
                "type": "http",
                "config": { "url": format!("{}/telemetry", server.uri()), "timeout": 500 },
                "filterPath": "$.data.value"
            }]
        }]
    })
}

/// Test that an HTTP source is fetched, cached, and served stale after failure
#[tokio::test]
async fn test_http_source_serves_last_good_value() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/telemetry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"value": 21.5}})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/telemetry"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut config = EngineConfig::default();
    config.warehouse.default_ttl_ms = 100;
    let engine = EngineContext::new(config)?;
    engine.register_component("boiler", &telemetry_config(&server))?;

    let first = engine.execute_component("boiler").await?;
    assert_eq!(first.data["telemetry"], json!(21.5));
    assert!(first.failed_sources.is_empty());

    tokio::time::sleep(Duration::from_millis(150)).await;

    let second = engine.execute_component("boiler").await?;
    assert_eq!(second.failed_sources, vec!["telemetry".to_string()]);
    assert_eq!(second.data["telemetry"], json!(21.5));

    engine.shutdown().await;
    Ok(())
}

/// Test that slow HTTP sources time out without blocking siblings
#[tokio::test]
async fn test_http_timeout_is_isolated() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)).set_body_json(json!(1)))
        .mount(&server)
        .await;

    let engine = EngineContext::new(EngineConfig::default())?;
    engine.register_component(
        "mixed",
        &json!({
            "dataSources": [
                {
                    "sourceId": "slow",
                    "dataItems": [{"type": "http", "config": {"url": format!("{}/slow", server.uri()), "timeout": 100}}]
                },
                {
                    "sourceId": "local",
                    "dataItems": [{"type": "static", "config": {"data": "ok"}}]
                }
            ]
        }),
    )?;

    let result = engine.execute_component("mixed").await?;
    assert_eq!(result.failed_sources, vec!["slow".to_string()]);
    assert_eq!(result.data["slow"], serde_json::Value::Null);
    assert_eq!(result.data["local"], json!("ok"));
    Ok(())
}
