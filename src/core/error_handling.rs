//! Generic error handling utilities
//!
//! Lets the CLI report errors uniformly: user-actionable errors (bad input,
//! wrong job state) print their own message, system errors (store failures)
//! print the operation context and leave the details to debug logging.

/// Trait for errors that can distinguish between user-actionable and system errors
///
/// When `is_user_actionable()` returns `true`, `user_message()` should return
/// `Some(message)`; otherwise it should return `None`.
pub trait ContextualError: std::error::Error {
    /// Returns true if this error carries a message meant for the operator
    fn is_user_actionable(&self) -> bool;

    /// The operator-facing message for user-actionable errors
    fn user_message(&self) -> Option<&str>;
}

/// Log errors with appropriate detail level based on error specificity
///
/// # Examples
/// ```rust,no_run
/// # use jobqueue::core::error_handling::log_error_with_context;
/// # use jobqueue::core::validation::ValidationError;
/// let err = ValidationError::new("Missing required field: queueName");
/// log_error_with_context(&err, "Enqueue job");
/// // Logs: "FATAL: Missing required field: queueName"
/// ```
pub fn log_error_with_context<E: ContextualError + std::fmt::Display + std::fmt::Debug>(
    error: &E,
    operation_context: &str,
) {
    match error.user_message() {
        Some(user_msg) if error.is_user_actionable() => log::error!("FATAL: {}", user_msg),
        _ => log::error!("FATAL: {}", operation_context),
    }
    log::debug!("DETAIL: {}", error);
    log::debug!("DEBUG_DETAILS: {:?}", error);
}

/// Render an error for terminal output following the same rules as logging
pub fn render_for_user<E: ContextualError + std::fmt::Display>(
    error: &E,
    operation_context: &str,
) -> String {
    match error.user_message() {
        Some(user_msg) if error.is_user_actionable() => user_msg.to_string(),
        _ => format!("{}: {}", operation_context, error),
    }
}
