//! Format normalizer
//!
//! Data-source configuration has been stored in several shapes over time.
//! [`FormatNormalizer::normalize_to_standard`] maps any JSON value onto the
//! single [`StandardConfig`] model; unrecognised input falls back to one
//! static item wrapping the whole value, so normalization never fails.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::model::{kinds, ComponentDataRequirement, DataSourceDescriptor, MergeStrategy, Transform};

/// Identity filter path
pub const IDENTITY_PATH: &str = "$";

/// Source id used when a shape carries a single unnamed source
pub const MAIN_SOURCE_ID: &str = "main";

fn default_kind() -> String {
    kinds::STATIC.to_string()
}

fn default_filter_path() -> String {
    IDENTITY_PATH.to_string()
}

/// Fetchable part of a standard data item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardItem {
    /// Fetch kind name
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,

    /// Kind-specific config
    #[serde(default)]
    pub config: Value,
}

/// Post-processing of a standard data item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Processing {
    /// Path applied to fetched data, `$` for identity
    #[serde(default = "default_filter_path")]
    pub filter_path: String,

    /// Script attached by editors; carried through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_script: Option<String>,

    /// Value used when the item yields nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl Default for Processing {
    fn default() -> Self {
        Self {
            filter_path: default_filter_path(),
            custom_script: None,
            default_value: None,
        }
    }
}

/// One data item of a standard source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardDataItem {
    /// What to fetch
    pub item: StandardItem,
    /// How to post-process it
    pub processing: Processing,
}

/// Wrapper matching the `{ "type": "object" }` shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MergeStrategySpec {
    /// Strategy
    #[serde(rename = "type", default)]
    pub strategy: MergeStrategy,
}

/// One named source of a standard config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardDataSource {
    /// Source id
    pub source_id: String,

    /// Items combined by `merge_strategy`
    #[serde(default)]
    pub data_items: Vec<StandardDataItem>,

    /// How items are combined
    #[serde(default)]
    pub merge_strategy: MergeStrategySpec,
}

/// Canonical multi-source configuration of one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardConfig {
    /// Owning component
    pub component_id: String,

    /// Sources in declaration order
    pub data_sources: Vec<StandardDataSource>,

    /// Creation time, epoch milliseconds
    #[serde(default)]
    pub created_at: i64,

    /// Last update time, epoch milliseconds
    #[serde(default)]
    pub updated_at: i64,
}

/// Configuration shapes the normalizer recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigFormat {
    /// Already canonical
    Standard,
    /// `dataSources[]` with raw items, written by the simple config editor
    SimpleConfigEditor,
    /// `dataSourceConfig.dataItems[]`, written by import/export
    ImportExport,
    /// Map of `{ type, data, metadata }` keyed by source id
    CardExecutor,
    /// Single `{ type, config }` object
    EditorManager,
    /// Anything else
    Generic,
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigFormat::Standard => "standard",
            ConfigFormat::SimpleConfigEditor => "simpleConfigEditor",
            ConfigFormat::ImportExport => "importExport",
            ConfigFormat::CardExecutor => "cardExecutor",
            ConfigFormat::EditorManager => "editorManager",
            ConfigFormat::Generic => "generic",
        };
        f.write_str(name)
    }
}

/// Converts between configuration shapes and [`StandardConfig`]
pub struct FormatNormalizer;

impl FormatNormalizer {
    /// Detect which shape `raw` is in
    pub fn detect_format(raw: &Value) -> ConfigFormat {
        if is_standard(raw) {
            ConfigFormat::Standard
        } else if is_simple_config_editor(raw) {
            ConfigFormat::SimpleConfigEditor
        } else if is_import_export(raw) {
            ConfigFormat::ImportExport
        } else if is_card_executor(raw) {
            ConfigFormat::CardExecutor
        } else if is_editor_manager(raw) {
            ConfigFormat::EditorManager
        } else {
            ConfigFormat::Generic
        }
    }

    /// Map any value onto the standard model. Total and idempotent.
    pub fn normalize_to_standard(raw: &Value, component_id: &str) -> StandardConfig {
        let mut format = Self::detect_format(raw);

        if format == ConfigFormat::Standard {
            match serde_json::from_value::<StandardConfig>(raw.clone()) {
                Ok(config) => return config,
                Err(e) => {
                    debug!(component_id, error = %e, "Standard-shaped config did not parse, re-wrapping");
                    format = ConfigFormat::SimpleConfigEditor;
                }
            }
        }

        debug!(component_id, format = %format, "Normalizing data source configuration");

        let now = Utc::now().timestamp_millis();
        let data_sources = match format {
            ConfigFormat::SimpleConfigEditor => from_simple_config_editor(raw),
            ConfigFormat::ImportExport => from_import_export(raw),
            ConfigFormat::CardExecutor => from_card_executor(raw),
            ConfigFormat::EditorManager => from_editor_manager(raw),
            ConfigFormat::Standard | ConfigFormat::Generic => from_generic(raw),
        };

        let created_at = match format {
            ConfigFormat::SimpleConfigEditor => raw.get("createdAt").and_then(Value::as_i64).unwrap_or(now),
            _ => now,
        };

        StandardConfig {
            component_id: component_id.to_string(),
            data_sources,
            created_at,
            updated_at: now,
        }
    }

    /// Normalize a batch of `(component_id, raw)` pairs
    pub fn normalize_multiple(inputs: &[(String, Value)]) -> Vec<StandardConfig> {
        inputs
            .iter()
            .map(|(component_id, raw)| Self::normalize_to_standard(raw, component_id))
            .collect()
    }

    /// Convert a standard config back into one of the legacy shapes
    pub fn convert_from_standard(standard: &StandardConfig, target: ConfigFormat) -> CoreResult<Value> {
        match target {
            ConfigFormat::Standard => Ok(serde_json::to_value(standard)?),
            ConfigFormat::SimpleConfigEditor => {
                let data_sources = standard
                    .data_sources
                    .iter()
                    .map(|ds| {
                        Ok(json!({
                            "sourceId": ds.source_id,
                            "dataItems": serde_json::to_value(&ds.data_items)?,
                            "mergeStrategy": serde_json::to_value(ds.merge_strategy)?,
                        }))
                    })
                    .collect::<CoreResult<Vec<Value>>>()?;
                Ok(json!({
                    "dataSources": data_sources,
                    "createdAt": standard.created_at,
                    "updatedAt": standard.updated_at,
                }))
            }
            ConfigFormat::ImportExport => {
                let data_items = standard
                    .data_sources
                    .iter()
                    .flat_map(|ds| ds.data_items.iter().map(|item| &item.item))
                    .map(serde_json::to_value)
                    .collect::<Result<Vec<Value>, _>>()?;
                let merge_strategy = standard
                    .data_sources
                    .first()
                    .map(|ds| ds.merge_strategy)
                    .unwrap_or_default();
                Ok(json!({
                    "dataSourceConfig": {
                        "dataItems": data_items,
                        "mergeStrategy": serde_json::to_value(merge_strategy)?,
                    }
                }))
            }
            ConfigFormat::CardExecutor => {
                let mut result = Map::new();
                for ds in &standard.data_sources {
                    let single = ds.data_items.len() == 1;
                    for (index, item) in ds.data_items.iter().enumerate() {
                        let key = if single {
                            ds.source_id.clone()
                        } else {
                            format!("{}_{}", ds.source_id, index)
                        };
                        result.insert(
                            key,
                            json!({
                                "type": item.item.kind,
                                "data": item.item.config,
                                "metadata": {
                                    "sourceId": ds.source_id,
                                    "processing": serde_json::to_value(&item.processing)?,
                                }
                            }),
                        );
                    }
                }
                Ok(Value::Object(result))
            }
            ConfigFormat::EditorManager | ConfigFormat::Generic => Err(CoreError::ConfigurationError(
                format!("{} is not a conversion target", target),
            )),
        }
    }

    /// List defects of a standard-shaped value. Never fails.
    pub fn validate_standard_format(raw: &Value) -> Vec<String> {
        let mut errors = Vec::new();

        match raw.get("componentId").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => {}
            _ => errors.push("missing componentId".to_string()),
        }

        match raw.get("dataSources").and_then(Value::as_array) {
            None => errors.push("dataSources must be an array".to_string()),
            Some(sources) => {
                for (ds_index, ds) in sources.iter().enumerate() {
                    match ds.get("sourceId").and_then(Value::as_str) {
                        Some(id) if !id.is_empty() => {}
                        _ => errors.push(format!("dataSources[{}] missing sourceId", ds_index)),
                    }

                    match ds.get("dataItems").and_then(Value::as_array) {
                        None => errors.push(format!("dataSources[{}].dataItems must be an array", ds_index)),
                        Some(items) => {
                            for (item_index, item) in items.iter().enumerate() {
                                let has_item = item.get("item").map_or(false, Value::is_object);
                                let has_processing = item.get("processing").map_or(false, Value::is_object);
                                if !has_item || !has_processing {
                                    errors.push(format!(
                                        "dataSources[{}].dataItems[{}] missing item or processing",
                                        ds_index, item_index
                                    ));
                                }
                            }
                        }
                    }
                }
            }
        }

        errors
    }

    /// Turn a standard config into the descriptors the bridge executes.
    ///
    /// Single-item sources become one descriptor named after the source.
    /// Multi-item sources become `{sourceId}_item_{i}` descriptors grouped
    /// under the source id with the source's merge strategy.
    pub fn to_requirement(standard: &StandardConfig) -> ComponentDataRequirement {
        let mut requirement = ComponentDataRequirement::new(standard.component_id.clone());

        for ds in &standard.data_sources {
            let single = ds.data_items.len() == 1;
            for (index, item) in ds.data_items.iter().enumerate() {
                let id = if single {
                    ds.source_id.clone()
                } else {
                    format!("{}_item_{}", ds.source_id, index)
                };

                let mut descriptor =
                    DataSourceDescriptor::new(id, item.item.kind.clone()).with_config(item.item.config.clone());

                if item.item.config.get("enabled") == Some(&Value::Bool(false)) {
                    descriptor = descriptor.disabled();
                }

                if let Some(path) = filter_path_to_transform(&item.processing.filter_path) {
                    descriptor = descriptor.with_transform(Transform::path(path));
                }

                if let Some(default_value) = &item.processing.default_value {
                    descriptor = descriptor.with_default_value(default_value.clone());
                }

                if !single {
                    descriptor = descriptor.in_group(ds.source_id.clone(), ds.merge_strategy.strategy);
                }

                requirement.data_sources.push(descriptor);
            }
        }

        requirement
    }
}

fn filter_path_to_transform(filter_path: &str) -> Option<String> {
    let trimmed = filter_path.trim();
    if trimmed.is_empty() || trimmed == IDENTITY_PATH {
        return None;
    }
    Some(trimmed.strip_prefix("$.").unwrap_or(trimmed).to_string())
}

// Detection

fn has_keys(value: &Value, keys: &[&str]) -> bool {
    value
        .as_object()
        .map_or(false, |obj| keys.iter().all(|k| obj.contains_key(*k)))
}

fn is_wrapped_item(item: &Value) -> bool {
    has_keys(item, &["item", "processing"])
}

fn is_standard(raw: &Value) -> bool {
    if !has_keys(raw, &["componentId", "dataSources"]) {
        return false;
    }
    let Some(sources) = raw.get("dataSources").and_then(Value::as_array) else {
        return false;
    };
    sources.iter().all(|ds| {
        has_keys(ds, &["sourceId", "dataItems"])
            && ds
                .get("dataItems")
                .and_then(Value::as_array)
                .map_or(false, |items| items.iter().all(is_wrapped_item))
    })
}

fn is_simple_config_editor(raw: &Value) -> bool {
    raw.get("dataSources")
        .and_then(Value::as_array)
        .map_or(false, |sources| sources.iter().any(|ds| has_keys(ds, &["sourceId", "dataItems"])))
}

fn is_import_export(raw: &Value) -> bool {
    raw.get("dataSourceConfig")
        .and_then(|c| c.get("dataItems"))
        .and_then(Value::as_array)
        .map_or(false, |items| items.iter().any(|item| !is_wrapped_item(item)))
}

fn is_card_executor(raw: &Value) -> bool {
    raw.as_object().map_or(false, |obj| {
        obj.values().any(|v| has_keys(v, &["type", "data", "metadata"]))
    })
}

fn is_editor_manager(raw: &Value) -> bool {
    has_keys(raw, &["type", "config"]) && !is_wrapped_item(raw)
}

// Conversion

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn parse_merge_strategy(value: Option<&Value>) -> MergeStrategySpec {
    let name = match value {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(v) => v.get("type").and_then(Value::as_str),
        None => None,
    };
    let strategy = match name {
        Some("array") => MergeStrategy::Array,
        Some("replace") => MergeStrategy::Replace,
        _ => MergeStrategy::Object,
    };
    MergeStrategySpec { strategy }
}

fn source_id_of(ds: &Value) -> String {
    match ds.get("sourceId") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "default".to_string(),
    }
}

/// Wrap a raw item, keeping it unchanged if it is already wrapped
fn wrap_item(raw: &Value) -> StandardDataItem {
    if is_wrapped_item(raw) {
        if let Ok(item) = serde_json::from_value::<StandardDataItem>(raw.clone()) {
            return item;
        }
    }

    let kind = raw
        .get("type")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(default_kind);
    let config = present(raw.get("config")).cloned().unwrap_or_else(|| raw.clone());

    StandardDataItem {
        item: StandardItem { kind, config },
        processing: Processing {
            filter_path: raw
                .get("filterPath")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(default_filter_path),
            custom_script: raw
                .get("customScript")
                .or_else(|| raw.get("processScript"))
                .and_then(Value::as_str)
                .map(str::to_string),
            default_value: present(raw.get("defaultValue")).cloned(),
        },
    }
}

fn wrap_items(items: Option<&Value>) -> Vec<StandardDataItem> {
    items
        .and_then(Value::as_array)
        .map(|items| items.iter().map(wrap_item).collect())
        .unwrap_or_default()
}

fn from_simple_config_editor(raw: &Value) -> Vec<StandardDataSource> {
    raw.get("dataSources")
        .and_then(Value::as_array)
        .map(|sources| {
            sources
                .iter()
                .map(|ds| StandardDataSource {
                    source_id: source_id_of(ds),
                    data_items: wrap_items(ds.get("dataItems")),
                    merge_strategy: parse_merge_strategy(ds.get("mergeStrategy")),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn from_import_export(raw: &Value) -> Vec<StandardDataSource> {
    let section = raw.get("dataSourceConfig");
    vec![StandardDataSource {
        source_id: MAIN_SOURCE_ID.to_string(),
        data_items: wrap_items(section.and_then(|s| s.get("dataItems"))),
        merge_strategy: parse_merge_strategy(section.and_then(|s| s.get("mergeStrategy"))),
    }]
}

fn from_card_executor(raw: &Value) -> Vec<StandardDataSource> {
    let Some(obj) = raw.as_object() else {
        return Vec::new();
    };
    obj.iter()
        .map(|(source_id, source)| {
            let kind = source
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(default_kind);
            let config = present(source.get("data")).cloned().unwrap_or_else(|| source.clone());
            StandardDataSource {
                source_id: source_id.clone(),
                data_items: vec![StandardDataItem {
                    item: StandardItem { kind, config },
                    processing: Processing::default(),
                }],
                merge_strategy: MergeStrategySpec::default(),
            }
        })
        .collect()
}

fn from_editor_manager(raw: &Value) -> Vec<StandardDataSource> {
    vec![StandardDataSource {
        source_id: MAIN_SOURCE_ID.to_string(),
        data_items: vec![wrap_item(raw)],
        merge_strategy: MergeStrategySpec::default(),
    }]
}

fn from_generic(raw: &Value) -> Vec<StandardDataSource> {
    vec![StandardDataSource {
        source_id: MAIN_SOURCE_ID.to_string(),
        data_items: vec![StandardDataItem {
            item: StandardItem {
                kind: default_kind(),
                config: raw.clone(),
            },
            processing: Processing::default(),
        }],
        merge_strategy: MergeStrategySpec::default(),
    }]
}
