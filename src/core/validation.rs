//! Input validation shared by the queue facade and the CLI
//!
//! Validation failures are user-actionable: they carry a message naming the
//! offending field and never change any state.

use thiserror::Error;

/// Longest queue or job-type name accepted
pub const MAX_NAME_LENGTH: usize = 128;

/// A rejected input value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl crate::core::error_handling::ContextualError for ValidationError {
    fn is_user_actionable(&self) -> bool {
        true
    }

    fn user_message(&self) -> Option<&str> {
        Some(&self.message)
    }
}

/// Validate a routing name (queue name or job type name)
///
/// Names must be non-empty, at most [`MAX_NAME_LENGTH`] characters and use
/// only ASCII alphanumerics plus `-`, `_`, `.` and `:`.
pub fn validate_name(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(format!(
            "Missing required field: {}",
            field
        )));
    }
    if value.len() > MAX_NAME_LENGTH {
        return Err(ValidationError::new(format!(
            "{} is longer than {} characters",
            field, MAX_NAME_LENGTH
        )));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
    {
        return Err(ValidationError::new(format!(
            "{} '{}' contains invalid character '{}'",
            field, value, bad
        )));
    }
    Ok(())
}

/// Require a non-blank string field inside a payload
pub fn require_text(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::new(format!(
            "Missing required field: {}",
            field
        )))
    } else {
        Ok(())
    }
}
