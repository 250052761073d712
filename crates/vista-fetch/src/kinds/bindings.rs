use async_trait::async_trait;
use serde_json::Value;
use vista_core::{kinds, DataSourceDescriptor, ErrorCode};

use crate::error::{FetchError, FetchResult};
use crate::executor::{FetchKind, FetchKindBase};

/// Pass-through of data produced by other pipelines.
///
/// Reads `config.dataSourceBindings` (or the config itself) and returns the
/// first binding's `rawData`, JSON-parsed when it is a string, else its
/// `finalResult`, else the binding as a whole.
#[derive(Debug, Default)]
pub struct BindingsKind;

impl BindingsKind {
    fn first_binding(descriptor: &DataSourceDescriptor) -> FetchResult<&Value> {
        let config = &descriptor.config;
        let bindings = config
            .get("dataSourceBindings")
            .filter(|b| !b.is_null())
            .unwrap_or(config);

        bindings
            .as_object()
            .and_then(|obj| obj.iter().find(|(key, _)| key.as_str() != "transform"))
            .map(|(_, binding)| binding)
            .ok_or_else(|| {
                FetchError::new(
                    ErrorCode::BindingsConfigError,
                    format!("bindings data source '{}' has no bindings", descriptor.id),
                )
            })
    }
}

impl FetchKindBase for BindingsKind {
    fn kind(&self) -> &str {
        kinds::BINDINGS
    }
}

#[async_trait]
impl FetchKind for BindingsKind {
    async fn fetch(&self, descriptor: &DataSourceDescriptor) -> FetchResult<Value> {
        let binding = Self::first_binding(descriptor)?;

        if let Some(raw) = binding.get("rawData").filter(|v| !v.is_null()) {
            return match raw {
                Value::String(text) => serde_json::from_str(text).map_err(|e| {
                    FetchError::new(ErrorCode::BindingsExecutionError, format!("rawData is not valid JSON: {}", e))
                }),
                other => Ok(other.clone()),
            };
        }

        if let Some(result) = binding.get("finalResult").filter(|v| !v.is_null()) {
            return Ok(result.clone());
        }

        Ok(binding.clone())
    }

    fn validate(&self, descriptor: &DataSourceDescriptor) -> Vec<String> {
        match Self::first_binding(descriptor) {
            Ok(_) => Vec::new(),
            Err(e) => vec![e.message],
        }
    }
}
