//!
//! Vista Engine - data-source orchestration
//!
//! Wires the fetch executor and the result warehouse into a data bridge
//! that executes component requirements, and adds the services around it:
//! a global polling scheduler, a config event bus that turns configuration
//! changes into re-execution triggers, and a loop protection manager that
//! breaks runaway call chains.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Component execution, merge and subscriptions
pub mod bridge;

/// Engine configuration
pub mod config;

/// Explicit wiring of every service
pub mod context;

/// Error types
pub mod error;

/// Config change events, filters and the event bus
pub mod events;

/// Call-chain circuit breaker
pub mod loop_guard;

/// Shared-timer polling
pub mod scheduler;

// Re-export key types
pub use bridge::{BridgeStats, ComponentExecutionResult, DataBridge, DataUpdateCallback, SubscriptionId};
pub use config::EngineConfig;
pub use context::EngineContext;
pub use error::{EngineError, EngineResult};
pub use events::{
    ChangeContext, ChangeSource, ConfigChangeEvent, ConfigEventBus, ConfigEventHandler, ConfigEventType,
    ConfigSection, EventBusConfig, EventBusStatistics, EventFilter, HandlerId,
};
pub use loop_guard::{CallId, LoopGuardConfig, LoopGuardStats, LoopProtectionManager};
pub use scheduler::{GlobalPollingScheduler, PollCallback, PollingTaskInfo, SchedulerConfig, SchedulerStatistics};
