use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Configuration layer a change belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfigSection {
    /// Shared base fields such as the bound device
    Base,
    /// Component-specific properties
    Component,
    /// Data-source configuration
    DataSource,
    /// Interaction wiring
    Interaction,
}

impl ConfigSection {
    /// Wire name of the section
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigSection::Base => "base",
            ConfigSection::Component => "component",
            ConfigSection::DataSource => "dataSource",
            ConfigSection::Interaction => "interaction",
        }
    }
}

impl fmt::Display for ConfigSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    /// Interactive edit
    User,
    /// Internal update
    System,
    /// Programmatic update
    Api,
    /// Imported configuration
    Import,
}

/// Event types handlers can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigEventType {
    /// Any change that passed the filters
    ConfigChanged,
    /// `dataSource` section changed
    DataSourceChanged,
    /// `component` section changed
    ComponentPropsChanged,
    /// `base` section changed
    BaseConfigChanged,
    /// `interaction` section changed
    InteractionChanged,
    /// Dispatched before the main dispatch
    BeforeConfigChange,
    /// Dispatched after the main dispatch
    AfterConfigChange,
}

impl ConfigEventType {
    /// Section-specific type fired alongside [`ConfigEventType::ConfigChanged`]
    pub fn for_section(section: ConfigSection) -> Self {
        match section {
            ConfigSection::Base => ConfigEventType::BaseConfigChanged,
            ConfigSection::Component => ConfigEventType::ComponentPropsChanged,
            ConfigSection::DataSource => ConfigEventType::DataSourceChanged,
            ConfigSection::Interaction => ConfigEventType::InteractionChanged,
        }
    }
}

/// Classification attached by the emitter or by filters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeContext {
    /// Whether the change should re-run the component's data sources
    #[serde(default)]
    pub should_trigger_execution: Option<bool>,

    /// Top-level fields that changed
    #[serde(default)]
    pub changed_fields: Vec<String>,
}

/// One configuration change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigChangeEvent {
    /// Changed component
    pub component_id: String,
    /// Component type name
    pub component_type: String,
    /// Changed layer
    pub section: ConfigSection,
    /// Previous section value
    #[serde(default)]
    pub old_config: Option<Value>,
    /// New section value
    pub new_config: Value,
    /// Emission time
    pub timestamp: DateTime<Utc>,
    /// Producer
    pub source: ChangeSource,
    /// Classification
    #[serde(default)]
    pub context: Option<ChangeContext>,
}

impl ConfigChangeEvent {
    /// User change with no previous value and no context
    pub fn new(
        component_id: impl Into<String>,
        component_type: impl Into<String>,
        section: ConfigSection,
        new_config: Value,
    ) -> Self {
        Self {
            component_id: component_id.into(),
            component_type: component_type.into(),
            section,
            old_config: None,
            new_config,
            timestamp: Utc::now(),
            source: ChangeSource::User,
            context: None,
        }
    }

    /// Set the previous value
    pub fn with_old_config(mut self, old_config: Value) -> Self {
        self.old_config = Some(old_config);
        self
    }

    /// Set the producer
    pub fn with_source(mut self, source: ChangeSource) -> Self {
        self.source = source;
        self
    }

    /// Set the classification
    pub fn with_context(mut self, context: ChangeContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Context, created empty on first use
    pub fn context_mut(&mut self) -> &mut ChangeContext {
        self.context.get_or_insert_with(ChangeContext::default)
    }

    /// True when the change should re-run data execution
    pub fn should_trigger_execution(&self) -> bool {
        self.context
            .as_ref()
            .and_then(|ctx| ctx.should_trigger_execution)
            .unwrap_or(false)
    }
}
