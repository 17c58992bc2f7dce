//! Error types for bufwatch.
//!
//! Every failure in this crate is local to one target or one monitor and is
//! reported as a value. Errors are strongly typed with thiserror so callers can
//! match on the specific condition.

use thiserror::Error;

use crate::memory::TargetId;

/// Configuration errors, raised before any monitor is created.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Buffer size {size} is out of range [1, {max}]")]
    BufferSizeOutOfRange {
        size: usize,
        max: usize,
    },

    #[error("Symbol name cannot be empty")]
    EmptySymbol,

    #[error("Could not parse {field} from '{input}'")]
    InvalidNumber {
        field: &'static str,
        input: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// The memory interface refused (or could not accept) a watch.
///
/// Surfaced synchronously to the caller that requested the watch. Never retried
/// automatically.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Cannot watch address {address:#x} on {target}")]
    InvalidAddress {
        target: TargetId,
        address: u64,
    },

    #[error("Cannot watch {size} bytes on {target} (max {max})")]
    InvalidSize {
        target: TargetId,
        size: usize,
        max: usize,
    },

    #[error("Memory interface of {target} refused watch at {address:#x} ({size} bytes)")]
    Refused {
        target: TargetId,
        address: u64,
        size: usize,
    },
}

/// Filter input errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Syntax error in regular expression '{input}': {message}")]
    Malformed {
        input: String,
        message: String,
    },
}

/// Top-level error type for bufwatch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl WatchError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a registration error.
    #[must_use]
    pub const fn is_registration(&self) -> bool {
        matches!(self, Self::Registration(_))
    }

    /// Returns true if this is a filter error.
    #[must_use]
    pub const fn is_filter(&self) -> bool {
        matches!(self, Self::Filter(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for bufwatch operations.
pub type WatchResult<T> = Result<T, WatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_size() {
        let err = ValidationError::BufferSizeOutOfRange { size: 0, max: 16384 };
        let msg = format!("{err}");
        assert!(msg.contains("out of range"));
        assert!(msg.contains("16384"));
    }

    #[test]
    fn test_validation_error_number() {
        let err = ValidationError::InvalidNumber {
            field: "offset",
            input: "abc".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("offset"));
        assert!(msg.contains("abc"));
    }

    #[test]
    fn test_registration_error_refused() {
        let err = RegistrationError::Refused {
            target: TargetId(3),
            address: 0x2000,
            size: 4,
        };
        let msg = format!("{err}");
        assert!(msg.contains("ID:3"));
        assert!(msg.contains("0x2000"));
    }

    #[test]
    fn test_filter_error_malformed() {
        let err = FilterError::Malformed {
            input: "(".to_string(),
            message: "unclosed group".to_string(),
        };
        assert!(format!("{err}").contains("unclosed group"));
    }

    #[test]
    fn test_watch_error_from_variants() {
        let err: WatchError = ValidationError::EmptySymbol.into();
        assert!(err.is_validation());
        assert!(!err.is_registration());

        let err: WatchError = RegistrationError::InvalidAddress {
            target: TargetId(1),
            address: 0,
        }
        .into();
        assert!(err.is_registration());

        let err: WatchError = FilterError::Malformed {
            input: "[".to_string(),
            message: "x".to_string(),
        }
        .into();
        assert!(err.is_filter());
    }

    #[test]
    fn test_watch_error_internal() {
        let err = WatchError::internal("worker gone");
        assert!(err.is_internal());
        assert!(format!("{err}").contains("worker gone"));
    }
}
