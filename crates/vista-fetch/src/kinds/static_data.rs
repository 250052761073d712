use async_trait::async_trait;
use serde_json::Value;
use vista_core::{kinds, DataSourceDescriptor, ErrorCode};

use crate::error::{FetchError, FetchResult};
use crate::executor::{FetchKind, FetchKindBase};

/// Literal data carried in the descriptor: `config.data`, else
/// `config.value`, else the whole config
#[derive(Debug, Default)]
pub struct StaticKind;

impl FetchKindBase for StaticKind {
    fn kind(&self) -> &str {
        kinds::STATIC
    }
}

#[async_trait]
impl FetchKind for StaticKind {
    async fn fetch(&self, descriptor: &DataSourceDescriptor) -> FetchResult<Value> {
        let config = &descriptor.config;
        if config.is_null() {
            return Err(FetchError::new(
                ErrorCode::StaticDataError,
                format!("static data source '{}' has no data", descriptor.id),
            ));
        }

        let data = config
            .get("data")
            .or_else(|| config.get("value"))
            .unwrap_or(config);
        Ok(data.clone())
    }

    fn validate(&self, descriptor: &DataSourceDescriptor) -> Vec<String> {
        if descriptor.config.is_null() {
            vec!["static data source requires config".to_string()]
        } else {
            Vec::new()
        }
    }
}
