//! Error types shared by the core contract.

use thiserror::Error;

/// Failure to parse a wire string into one of the core enums.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {field} value: '{value}'")]
pub struct ParseEnumError {
    pub field: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(field: &'static str, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }
}
