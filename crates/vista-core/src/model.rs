//! Descriptors, requirements and execution results.
//!
//! A [`DataSourceDescriptor`] is one fetchable unit, a
//! [`ComponentDataRequirement`] is everything a single visual component
//! needs, and an [`ExecutionResult`] is what one fetch attempt produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{CoreError, CoreResult};

/// Names of the built-in fetch kinds
pub mod kinds {
    /// Literal data carried in the descriptor config
    pub const STATIC: &str = "static";
    /// HTTP request through the injected transport
    pub const HTTP: &str = "http";
    /// JSON text or inline JSON value
    pub const JSON: &str = "json";
    /// Streaming connection stub
    pub const WEBSOCKET: &str = "websocket";
    /// Pass-through of data produced by other pipelines
    pub const BINDINGS: &str = "bindings";

    /// All built-in kinds in registration order
    pub const BUILTIN: [&str; 5] = [STATIC, HTTP, JSON, WEBSOCKET, BINDINGS];
}

/// How several descriptors of one group are combined into one value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Shallow object merge, last write wins per key
    #[default]
    Object,
    /// Positional array, array values are concatenated
    Array,
    /// Last value replaces everything before it
    Replace,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStrategy::Object => write!(f, "object"),
            MergeStrategy::Array => write!(f, "array"),
            MergeStrategy::Replace => write!(f, "replace"),
        }
    }
}

/// Post-fetch transform: path extraction, field re-mapping and array filtering
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transform {
    /// Dot-notation path into the fetched data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Target field -> source path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<Map<String, Value>>,

    /// Field -> expected value, applied to array elements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Map<String, Value>>,

    /// Fail the transform when `path` does not resolve
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
}

impl Transform {
    /// Transform that only extracts `path`
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Parse a transform from a JSON value
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| CoreError::TransformError(format!("invalid transform: {}", e)))
    }

    /// True when the transform does nothing
    pub fn is_empty(&self) -> bool {
        self.path.is_none() && self.mapping.is_none() && self.filter.is_none()
    }
}

fn default_enabled() -> bool {
    true
}

/// One declarative, fetchable data-source unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceDescriptor {
    /// Source id, unique within a requirement
    pub id: String,

    /// Fetch kind name, resolved through the executor registry
    #[serde(rename = "type")]
    pub kind: String,

    /// Disabled descriptors are never dispatched
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Kind-specific configuration
    #[serde(default)]
    pub config: Value,

    /// Optional post-fetch transform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,

    /// Value used when the fetch or transform fails and nothing is cached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,

    /// Merge group; descriptors sharing a group are combined under its name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Strategy used when combining a group
    #[serde(default)]
    pub merge_strategy: MergeStrategy,
}

impl DataSourceDescriptor {
    /// Create an enabled descriptor with an empty config
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            enabled: true,
            config: Value::Object(Map::new()),
            transform: None,
            default_value: None,
            group: None,
            merge_strategy: MergeStrategy::default(),
        }
    }

    /// Static descriptor that yields `data`
    pub fn static_data(id: impl Into<String>, data: Value) -> Self {
        let mut config = Map::new();
        config.insert("data".to_string(), data);
        Self::new(id, kinds::STATIC).with_config(Value::Object(config))
    }

    /// Replace the config
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Attach a transform
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Attach a default value
    pub fn with_default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Put the descriptor in a merge group
    pub fn in_group(mut self, group: impl Into<String>, strategy: MergeStrategy) -> Self {
        self.group = Some(group.into());
        self.merge_strategy = strategy;
        self
    }

    /// Mark the descriptor disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Transform to apply: the descriptor's own, else `config.transform`
    pub fn effective_transform(&self) -> CoreResult<Option<Transform>> {
        if let Some(transform) = &self.transform {
            return Ok(Some(transform.clone()));
        }
        match self.config.get("transform") {
            Some(Value::Null) | None => Ok(None),
            Some(value) => Transform::from_value(value).map(Some),
        }
    }

    /// Read a string field from the config
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// Everything one visual component needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDataRequirement {
    /// Owning component
    pub component_id: String,

    /// Descriptors in declaration order
    #[serde(default)]
    pub data_sources: Vec<DataSourceDescriptor>,
}

impl ComponentDataRequirement {
    /// Create an empty requirement
    pub fn new(component_id: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            data_sources: Vec::new(),
        }
    }

    /// Append a descriptor
    pub fn with_source(mut self, descriptor: DataSourceDescriptor) -> Self {
        self.data_sources.push(descriptor);
        self
    }

    /// Find a descriptor by id
    pub fn source(&self, id: &str) -> Option<&DataSourceDescriptor> {
        self.data_sources.iter().find(|d| d.id == id)
    }
}

/// Structured failure codes carried by [`ExecutionResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Descriptor is disabled
    DataSourceDisabled,
    /// No kind registered under the descriptor's kind name
    UnsupportedDataSource,
    /// A kind implementation panicked
    ExecutorException,
    /// HTTP descriptor without url
    HttpNoUrl,
    /// HTTP transport failed
    HttpRequestFailed,
    /// HTTP request exceeded its timeout
    HttpTimeout,
    /// Static descriptor could not produce data
    StaticDataError,
    /// JSON descriptor without content
    JsonNoContent,
    /// JSON content did not parse
    JsonParseError,
    /// Websocket descriptor without url
    WsNoUrl,
    /// Websocket connection could not be opened
    WsConnectionError,
    /// Bindings config missing or malformed
    BindingsConfigError,
    /// Bindings payload could not be read
    BindingsExecutionError,
    /// Transform could not be applied
    TransformFailed,
}

impl ErrorCode {
    /// Wire name of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DataSourceDisabled => "DATA_SOURCE_DISABLED",
            ErrorCode::UnsupportedDataSource => "UNSUPPORTED_DATA_SOURCE",
            ErrorCode::ExecutorException => "EXECUTOR_EXCEPTION",
            ErrorCode::HttpNoUrl => "HTTP_NO_URL",
            ErrorCode::HttpRequestFailed => "HTTP_REQUEST_FAILED",
            ErrorCode::HttpTimeout => "HTTP_TIMEOUT",
            ErrorCode::StaticDataError => "STATIC_DATA_ERROR",
            ErrorCode::JsonNoContent => "JSON_NO_CONTENT",
            ErrorCode::JsonParseError => "JSON_PARSE_ERROR",
            ErrorCode::WsNoUrl => "WS_NO_URL",
            ErrorCode::WsConnectionError => "WS_CONNECTION_ERROR",
            ErrorCode::BindingsConfigError => "BINDINGS_CONFIG_ERROR",
            ErrorCode::BindingsExecutionError => "BINDINGS_EXECUTION_ERROR",
            ErrorCode::TransformFailed => "TRANSFORM_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing and size of one fetch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    /// Wall time spent in the fetch, in milliseconds
    pub response_time_ms: u64,
    /// Serialized size of the produced data
    pub data_size_bytes: usize,
}

/// Outcome of one descriptor fetch. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Whether the fetch and transform succeeded
    pub success: bool,

    /// Produced data on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Human-readable error on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Structured error code on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,

    /// When the result was produced
    pub timestamp: DateTime<Utc>,

    /// Descriptor id this result belongs to
    pub source_id: String,

    /// Timing and size
    pub metadata: ExecutionMetadata,
}

impl ExecutionResult {
    /// Successful result
    pub fn ok(source_id: impl Into<String>, data: Value, response_time_ms: u64) -> Self {
        let data_size_bytes = serde_json::to_vec(&data).map(|b| b.len()).unwrap_or_default();
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
            timestamp: Utc::now(),
            source_id: source_id.into(),
            metadata: ExecutionMetadata {
                response_time_ms,
                data_size_bytes,
            },
        }
    }

    /// Failed result
    pub fn failure(
        source_id: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
        response_time_ms: u64,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            error_code: Some(code),
            timestamp: Utc::now(),
            source_id: source_id.into(),
            metadata: ExecutionMetadata {
                response_time_ms,
                data_size_bytes: 0,
            },
        }
    }
}
