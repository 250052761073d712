//! Error types for the Vista engine

use thiserror::Error;
use vista_core::CoreError;
use vista_warehouse::WarehouseError;

/// Engine error types
#[derive(Error, Debug)]
pub enum EngineError {
    /// Data model or normalization error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// Cache error
    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// No requirement registered for the component
    #[error("Component not registered: {0}")]
    ComponentNotFound(String),

    /// Unknown polling task id
    #[error("Polling task not found: {0}")]
    TaskNotFound(String),

    /// Call rejected by loop protection
    #[error("Call blocked by loop protection: {0}")]
    LoopDetected(String),

    /// A guarded call panicked and tracking state was reset
    #[error("Recovered from panic: {0}")]
    Panic(String),

    /// Event handler failure
    #[error("Event handler failed: {0}")]
    HandlerFailed(String),

    /// Event filter failure
    #[error("Event filter failed: {0}")]
    FilterFailed(String),
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Render a caught panic payload
pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
