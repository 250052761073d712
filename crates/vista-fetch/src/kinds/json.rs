use async_trait::async_trait;
use serde_json::Value;
use vista_core::{kinds, DataSourceDescriptor, ErrorCode};

use crate::error::{FetchError, FetchResult};
use crate::executor::{FetchKind, FetchKindBase};

/// JSON text in `config.jsonContent`, or an inline JSON value
#[derive(Debug, Default)]
pub struct JsonKind;

impl FetchKindBase for JsonKind {
    fn kind(&self) -> &str {
        kinds::JSON
    }
}

#[async_trait]
impl FetchKind for JsonKind {
    async fn fetch(&self, descriptor: &DataSourceDescriptor) -> FetchResult<Value> {
        match descriptor.config.get("jsonContent") {
            None | Some(Value::Null) => Err(FetchError::new(
                ErrorCode::JsonNoContent,
                format!("json data source '{}' has no content", descriptor.id),
            )),
            Some(Value::String(text)) if text.trim().is_empty() => Err(FetchError::new(
                ErrorCode::JsonNoContent,
                format!("json data source '{}' has empty content", descriptor.id),
            )),
            Some(Value::String(text)) => serde_json::from_str(text)
                .map_err(|e| FetchError::new(ErrorCode::JsonParseError, format!("invalid JSON: {}", e))),
            Some(inline) => Ok(inline.clone()),
        }
    }

    fn validate(&self, descriptor: &DataSourceDescriptor) -> Vec<String> {
        match descriptor.config.get("jsonContent") {
            None | Some(Value::Null) => vec!["json data source requires config.jsonContent".to_string()],
            Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
                Ok(_) => Vec::new(),
                Err(e) => vec![format!("jsonContent is not valid JSON: {}", e)],
            },
            Some(_) => Vec::new(),
        }
    }
}
