//! Error types for scenario calculations
//!
//! ## Table of Contents
//! - **ScenarioError**: Main error enum covering all failure modes
//! - **Result**: Type alias for `Result<T, ScenarioError>`

use thiserror::Error;

/// Result type alias for scenario operations
pub type Result<T> = std::result::Result<T, ScenarioError>;

/// Main error type for scenario operations
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// Unrecognized calculation mode, missing parameter or unknown model name
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed rupture or site geometry
    #[error("geometry error: {0}")]
    Geometry(String),

    /// A produced matrix does not have the shape its contract promises
    #[error("shape mismatch for {what}: expected {expected:?}, found {found:?}")]
    NumericShape {
        /// What was being produced
        what: String,
        /// Expected (rows, cols)
        expected: (usize, usize),
        /// Actual (rows, cols)
        found: (usize, usize),
    },

    /// A partition of the map-reduce failed; the whole reduction is aborted
    #[error("partition {index} failed: {message}")]
    Partition {
        /// Submission index of the failed partition
        index: usize,
        /// Failure description
        message: String,
    },

    /// A work item received a weight that cannot be used for balancing
    #[error("invalid weight {weight} for work item {item}")]
    InvalidWeight {
        /// Description of the offending item
        item: String,
        /// The weight returned by the weight function
        weight: f64,
    },

    /// A risk model could not evaluate its inputs
    #[error("risk model error: {0}")]
    Model(String),

    /// Repository backend failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Generic IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error (should not occur in normal operation)
    #[error("internal error: {0}")]
    Internal(String),
}

impl ScenarioError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a geometry error
    pub fn geometry(msg: impl Into<String>) -> Self {
        Self::Geometry(msg.into())
    }

    /// Create a shape mismatch error
    pub fn shape(what: impl Into<String>, expected: (usize, usize), found: (usize, usize)) -> Self {
        Self::NumericShape {
            what: what.into(),
            expected,
            found,
        }
    }

    /// Create a partition failure
    pub fn partition(index: usize, msg: impl Into<String>) -> Self {
        Self::Partition {
            index,
            message: msg.into(),
        }
    }

    /// Create a risk model error
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error was raised while validating the configuration
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

impl From<toml::de::Error> for ScenarioError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<prometheus::Error> for ScenarioError {
    fn from(err: prometheus::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_error_message() {
        let err = ScenarioError::shape("gmf[PGA]", (2, 3), (2, 2));
        assert_eq!(
            err.to_string(),
            "shape mismatch for gmf[PGA]: expected (2, 3), found (2, 2)"
        );
    }

    #[test]
    fn test_toml_error_is_config() {
        let err: ScenarioError = toml::from_str::<toml::Value>("= nope").unwrap_err().into();
        assert!(err.is_config());
    }
}
