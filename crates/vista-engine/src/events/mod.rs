//! Config event bus
//!
//! Configuration changes flow through a priority-ordered filter chain and
//! are then dispatched to handlers of the generic and section-specific
//! event types. Changes classified as execution-triggering are forwarded
//! to a single consumer over an `mpsc` channel.

mod bus;
mod filters;
mod types;

pub use bus::{ConfigEventBus, ConfigEventHandler, EventBusConfig, EventBusStatistics, HandlerId};
pub use filters::{BaseRelevanceFilter, DeduplicationFilter, EventFilter, IgnoreSystemUpdatesFilter};
pub use types::{ChangeContext, ChangeSource, ConfigChangeEvent, ConfigEventType, ConfigSection};
