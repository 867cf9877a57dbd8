//! Validation error type shared by every layer that checks user input.

use thiserror::Error;

/// A field failed validation. The message is safe to return to clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field was empty.
    #[error("{field} cannot be empty")]
    Empty {
        /// Field name as it appears on the wire.
        field: &'static str,
    },
    /// A string field exceeded its maximum length.
    #[error("{field} too long (max {max} characters)")]
    TooLong {
        /// Field name.
        field: &'static str,
        /// Maximum allowed length in characters.
        max: usize,
    },
    /// A string field was shorter than its minimum length.
    #[error("{field} must be at least {min} characters")]
    TooShort {
        /// Field name.
        field: &'static str,
        /// Minimum allowed length in characters.
        min: usize,
    },
    /// A field contained characters outside its allowed set.
    #[error("{field} {reason}")]
    InvalidFormat {
        /// Field name.
        field: &'static str,
        /// What the accepted format is.
        reason: &'static str,
    },
    /// A numeric field was outside its allowed range.
    #[error("{field} {reason}")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// Human-readable bound description.
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_display() {
        let err = ValidationError::Empty { field: "app_id" };
        assert_eq!(err.to_string(), "app_id cannot be empty");
    }

    #[test]
    fn too_long_display() {
        let err = ValidationError::TooLong {
            field: "reason",
            max: 500,
        };
        assert_eq!(err.to_string(), "reason too long (max 500 characters)");
    }

    #[test]
    fn out_of_range_display() {
        let err = ValidationError::OutOfRange {
            field: "priority",
            reason: "must be between 0 and 3",
        };
        assert_eq!(err.to_string(), "priority must be between 0 and 3");
    }
}
