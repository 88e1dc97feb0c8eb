//! Errors raised at the admission API boundary

use thiserror::Error;

/// Validation failures for caller-supplied input.
///
/// The admission algorithm itself never fails for valid input; these
/// errors are produced before a request reaches it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AdmissionError {
    /// Task requirements carried a negative or non-finite estimate, or a
    /// priority outside 1..=10
    #[error("invalid task requirements for {task_id}: {reason}")]
    InvalidRequirements { task_id: String, reason: String },

    /// Reservation amounts were negative or non-finite
    #[error("invalid reservation for {task_id}: {reason}")]
    InvalidReservation { task_id: String, reason: String },

    /// Historical execution sample was negative or non-finite
    #[error("invalid sample for task type {task_type}: {reason}")]
    InvalidSample { task_type: String, reason: String },

    /// Monitor or controller configuration out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Check that a caller-supplied quantity is finite and non-negative.
pub(crate) fn check_quantity(name: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() {
        return Err(format!("{name} must be finite, got {value}"));
    }
    if value < 0.0 {
        return Err(format!("{name} must not be negative, got {value}"));
    }
    Ok(())
}
