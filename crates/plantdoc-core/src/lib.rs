//! PlantDoc Core
//!
//! Core types and utilities shared across PlantDoc components.
//!
//! This crate provides:
//! - The label set and probability types exchanged between the classifier
//!   and the decision layer
//! - Diagnosis and prediction records returned to callers
//! - Error types and result handling

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{to_percent, Diagnosis, LabelSet, LabelSource, Prediction, ProbabilityVector};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{Diagnosis, LabelSet, LabelSource, Prediction, ProbabilityVector};
}
