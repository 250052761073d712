//! Built-in fetch kinds

pub mod bindings;
pub mod http;
pub mod json;
pub mod static_data;
pub mod websocket;

pub use bindings::*;
pub use http::*;
pub use json::*;
pub use static_data::*;
pub use websocket::*;

use std::sync::Arc;

use crate::executor::FetchKind;

/// One instance of every built-in kind
pub fn builtin_kinds(transport: Arc<dyn HttpTransport>) -> Vec<Arc<dyn FetchKind>> {
    vec![
        Arc::new(StaticKind),
        Arc::new(HttpKind::new(transport)),
        Arc::new(JsonKind),
        Arc::new(WebSocketKind::new()),
        Arc::new(BindingsKind),
    ]
}
