use thiserror::Error;

/// Warehouse error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WarehouseError {
    /// A single value is larger than the whole memory budget
    #[error("Entry {component_id}/{source_id} is {size_bytes} bytes, limit is {limit_bytes}")]
    EntryTooLarge {
        /// Owning component
        component_id: String,
        /// Source within the component
        source_id: String,
        /// Estimated entry size
        size_bytes: usize,
        /// Configured memory budget
        limit_bytes: usize,
    },

    /// Nothing left to evict and the entry still does not fit
    #[error("Warehouse capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Value could not be measured
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result alias for warehouse operations
pub type WarehouseResult<T> = Result<T, WarehouseError>;

impl From<serde_json::Error> for WarehouseError {
    fn from(err: serde_json::Error) -> Self {
        WarehouseError::Serialization(err.to_string())
    }
}
