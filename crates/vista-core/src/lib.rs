//!
//! Vista Core - data model for the Vista data-source engine
//!
//! This crate defines the descriptors, requirements and execution results
//! shared by every other crate, together with the format normalizer that
//! turns historical configuration shapes into one canonical model.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Error types
pub mod error;

/// Descriptors, requirements and execution results
pub mod model;

/// Conversion between configuration shapes and the standard model
pub mod normalizer;

// Re-export key types
pub use error::{CoreError, CoreResult};
pub use model::{
    kinds, ComponentDataRequirement, DataSourceDescriptor, ErrorCode, ExecutionMetadata,
    ExecutionResult, MergeStrategy, Transform,
};
pub use normalizer::{
    ConfigFormat, FormatNormalizer, MergeStrategySpec, Processing, StandardConfig,
    StandardDataItem, StandardDataSource, StandardItem,
};
