use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;
use vista_engine::{EngineConfig, EngineContext};

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::load();

    vista_monitoring::init_logging(&config.monitoring).context("Failed to initialize logging")?;

    let engine = EngineContext::new(config).context("Invalid engine configuration")?;

    engine
        .register_component(
            "demo-card",
            &json!({
                "temperature": {
                    "type": "static",
                    "data": { "data": { "value": 21.5, "unit": "C" } },
                    "metadata": {}
                },
                "status": {
                    "type": "json",
                    "data": { "jsonContent": "{\"online\": true}" },
                    "metadata": {}
                }
            }),
        )
        .context("Failed to register demo component")?;

    let first = engine.execute_component("demo-card").await?;
    info!(failed = first.failed_sources.len(), "First execution finished");

    let second = engine.execute_component("demo-card").await?;
    info!(cached = second.cached_sources.len(), "Second execution served from cache");

    println!("{}", serde_json::to_string_pretty(&second.data)?);
    println!("{}", serde_json::to_string_pretty(&engine.debug_snapshot())?);

    engine.shutdown().await;
    Ok(())
}
