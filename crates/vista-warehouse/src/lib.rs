//!
//! Vista Warehouse - keyed storage of last-good data-source results
//!
//! Entries are keyed by `(component_id, source_id)`, expire lazily on read
//! after their TTL, and are evicted least-accessed-first when the memory or
//! item budget is exhausted. Expired values stay readable as last-known-good
//! data until the component's cache is cleared.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Error types
pub mod error;

/// The cache itself
pub mod warehouse;

pub use error::{WarehouseError, WarehouseResult};
pub use warehouse::{
    CacheEntry, ComponentStorageStats, DataWarehouse, StorageStats, WarehouseConfig, WarehouseMetrics,
};
