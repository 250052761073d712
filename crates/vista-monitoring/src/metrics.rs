//! Engine metric recording points.
//!
//! Each call emits one structured event on the `vista::metrics` target.

use tracing::{debug, info};

/// Vista engine specific metrics
pub struct EngineMetrics;

impl EngineMetrics {
    /// Record one data-source execution
    pub fn record_source_execution(source_id: &str, kind: &str, duration_ms: u64, success: bool) {
        debug!(
            target: "vista::metrics",
            source_id,
            kind,
            duration_ms,
            success,
            "Source execution"
        );
    }

    /// Record a component execution through the bridge
    pub fn record_component_execution(component_id: &str, sources: usize, failed: usize, duration_ms: u64) {
        info!(
            target: "vista::metrics",
            component_id,
            sources,
            failed,
            duration_ms,
            "Component execution"
        );
    }

    /// Record a bridge cache lookup
    pub fn record_cache_lookup(component_id: &str, source_id: &str, hit: bool) {
        debug!(target: "vista::metrics", component_id, source_id, hit, "Cache lookup");
    }

    /// Record a polling tick
    pub fn record_poll_tick(due: usize, fired: usize) {
        debug!(target: "vista::metrics", due, fired, "Polling tick");
    }

    /// Record a config event outcome
    pub fn record_config_event(component_id: &str, section: &str, dispatched: bool) {
        debug!(target: "vista::metrics", component_id, section, dispatched, "Config event");
    }

    /// Record a call rejected by loop protection
    pub fn record_loop_rejection(call_key: &str, reason: &str) {
        info!(target: "vista::metrics", call_key, reason, "Loop protection rejection");
    }
}
