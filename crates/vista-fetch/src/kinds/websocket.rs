use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::info;
use vista_core::{kinds, DataSourceDescriptor, ErrorCode};

use crate::error::{FetchError, FetchResult};
use crate::executor::{FetchKind, FetchKindBase};

/// Streaming-connection stub. Records the url as an open connection and
/// reports `{status: "connecting", url}`; `cleanup` closes everything.
#[derive(Debug, Default)]
pub struct WebSocketKind {
    connections: Mutex<HashSet<String>>,
}

impl WebSocketKind {
    /// Create the kind with no open connections
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of urls currently held open
    pub fn open_connections(&self) -> usize {
        self.connections.lock().len()
    }

    fn url_of(descriptor: &DataSourceDescriptor) -> Option<&str> {
        descriptor
            .config_str("wsUrl")
            .or_else(|| descriptor.config_str("url"))
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

impl FetchKindBase for WebSocketKind {
    fn kind(&self) -> &str {
        kinds::WEBSOCKET
    }
}

#[async_trait]
impl FetchKind for WebSocketKind {
    async fn fetch(&self, descriptor: &DataSourceDescriptor) -> FetchResult<Value> {
        let url = Self::url_of(descriptor).ok_or_else(|| {
            FetchError::new(
                ErrorCode::WsNoUrl,
                format!("websocket data source '{}' has no url", descriptor.id),
            )
        })?;

        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(FetchError::new(
                ErrorCode::WsConnectionError,
                format!("not a websocket url: {}", url),
            ));
        }

        self.connections.lock().insert(url.to_string());
        Ok(json!({ "status": "connecting", "url": url }))
    }

    fn validate(&self, descriptor: &DataSourceDescriptor) -> Vec<String> {
        match Self::url_of(descriptor) {
            None => vec!["websocket data source requires config.wsUrl".to_string()],
            Some(_) => Vec::new(),
        }
    }

    async fn cleanup(&self) {
        let closed = {
            let mut connections = self.connections.lock();
            let count = connections.len();
            connections.clear();
            count
        };
        info!(closed, "Closed websocket connections");
    }
}
