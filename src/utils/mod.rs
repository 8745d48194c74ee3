// Utility functions

use crate::types::*;

/// Validates a value against a constraint and returns an error if it fails
pub fn validate<T, F>(
    value: T,
    constraint: F,
    error_message: impl Into<String>,
) -> RestResult<T>
where
    F: FnOnce(&T) -> bool,
{
    if constraint(&value) {
        Ok(value)
    } else {
        Err(RestError::ValidationError(error_message.into()))
    }
}

/// Validates strings passed in as kinds, URLs and credentials
pub struct StringValidator;

impl StringValidator {
    /// Validates that a string has non-whitespace content
    pub fn not_empty(value: impl Into<String>, param_name: &str) -> RestResult<String> {
        let value = value.into();
        validate(
            value,
            |s| !s.trim().is_empty(),
            format!("{} cannot be empty", param_name),
        )
    }
}

/// Turn a dasherized kind such as `user-action` into `user_action`
pub fn underscore(kind: &str) -> String {
    kind.replace('-', "_")
}
