// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for thinlab model and quantity operations
#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    /// Byte quantity could not be parsed
    #[error("Invalid byte quantity '{value}': {reason}")]
    #[diagnostic(
        code(thinlab::core::invalid_quantity),
        help("Expected a number with an optional unit suffix, e.g. \"512MiB\", \"2g\", \"1024\"")
    )]
    InvalidQuantity {
        #[allow(unused)]
        value: String,
        #[allow(unused)]
        reason: String,
    },

    /// Serialization failed
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(thinlab::core::serialization_error),
        help("The model could not be converted to/from its wire representation")
    )]
    Serialization {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn invalid_quantity(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQuantity {
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}
