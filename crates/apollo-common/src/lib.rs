//! Common types for the Apollo operator: CRDs, errors, naming and telemetry

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod labels;
pub mod naming;
pub mod telemetry;

pub use error::{Error, TaskStage};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "apollo-operator";
