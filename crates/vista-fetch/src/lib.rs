//!
//! Vista Fetch - unified fetch executor
//!
//! A registry of pluggable [`FetchKind`]s keyed by kind name, the
//! built-in kinds (static, http, json, websocket, bindings) and the
//! transform pipeline applied to every fetched value.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Error types
pub mod error;

/// Kind registry and dispatcher
pub mod executor;

/// Built-in kinds
pub mod kinds;

/// Path extraction, mapping and filtering
pub mod transform;

// Re-export key types
pub use error::{FetchError, FetchResult, TransportError};
pub use executor::{FetchKind, FetchKindBase, UnifiedExecutor};
pub use kinds::{
    BindingsKind, HttpKind, HttpRequest, HttpTransport, JsonKind, ReqwestTransport, StaticKind, WebSocketKind,
    DEFAULT_HTTP_TIMEOUT_MS,
};
