//! Testing utilities for the Vista engine.
//!
//! Fake fetch kinds that count, delay, fail or panic on demand, descriptor
//! builders for them, and a tracing initializer for test output.

pub mod builders;
pub mod fakes;

pub use builders::{counting_source, counting_source_with_data, panicking_source, test_executor};
pub use fakes::{CountingKind, PanickingKind, COUNTING_KIND, PANICKING_KIND};

use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a test writer subscriber once per process. Honours `RUST_LOG`.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
