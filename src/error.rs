//! Unified error hierarchy for liftrx
//!
//! Validation failures are reported before any computation starts. Missing
//! or incomplete data never produces an error; it is resolved to neutral
//! defaults and surfaced through flags and warnings instead.

use thiserror::Error;

/// Top-level error type for all liftrx operations
#[derive(Debug, Error)]
pub enum LiftRxError {
    /// Input validation errors (malformed shapes, out-of-range parameters)
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Training history storage errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Optional overlay collaborator failures
    #[error("Overlay error: {0}")]
    Overlay(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Boundary validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Numeric field outside its documented range
    #[error("{field}={value} is outside the allowed range [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// NaN or infinite input
    #[error("{field} must be a finite number")]
    NonFinite { field: String },

    /// Plan duration outside 4..=6 weeks
    #[error("Plan duration must be between 4 and 6 weeks, got {weeks}")]
    InvalidDuration { weeks: u32 },

    /// Unrecognised goal preset
    #[error("Unknown goal preset: {goal}")]
    UnknownGoal { goal: String },

    /// Weight increment must be strictly positive
    #[error("Weight increment must be positive, got {value}")]
    InvalidIncrement { value: f64 },

    /// Training days per week outside 1..=7
    #[error("Training days per week must be between 1 and 7, got {days}")]
    InvalidSessionsPerWeek { days: u32 },

    /// Unrecognised enumerated value
    #[error("Unknown {field}: {value}")]
    UnknownValue { field: String, value: String },
}

/// Storage errors raised by history providers
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connection failed
    #[error("Database connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored row could not be decoded
    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: String, reason: String },

    /// Record not found
    #[error("Record not found: {table}.{id}")]
    NotFound { table: String, id: String },
}

/// Result type alias for liftrx operations
pub type Result<T> = std::result::Result<T, LiftRxError>;

impl ValidationError {
    /// Range check helper used by every boundary validator
    pub fn check_range(field: &str, value: f64, min: f64, max: f64) -> std::result::Result<(), Self> {
        if !value.is_finite() {
            return Err(ValidationError::NonFinite {
                field: field.to_string(),
            });
        }
        if value < min || value > max {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value,
                min,
                max,
            });
        }
        Ok(())
    }

    /// Finite check for optional fields with no range
    pub fn check_finite(field: &str, value: f64) -> std::result::Result<(), Self> {
        if value.is_finite() {
            Ok(())
        } else {
            Err(ValidationError::NonFinite {
                field: field.to_string(),
            })
        }
    }
}

impl LiftRxError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LiftRxError::Database(DatabaseError::ConnectionFailed { .. }) | LiftRxError::Io(_)
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            LiftRxError::Validation(_) => ErrorSeverity::Warning,
            LiftRxError::Database(DatabaseError::NotFound { .. }) => ErrorSeverity::Warning,
            LiftRxError::Overlay(_) => ErrorSeverity::Info,
            LiftRxError::Database(_) => ErrorSeverity::Error,
            LiftRxError::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            LiftRxError::Validation(ValidationError::InvalidDuration { weeks }) => {
                format!("Plans run for 4 to 6 weeks; {} weeks is not supported.", weeks)
            }
            LiftRxError::Validation(ValidationError::UnknownGoal { goal }) => {
                format!(
                    "Unknown training goal '{}'. Try strength, hypertrophy, powerlifting, peaking, endurance or general.",
                    goal
                )
            }
            LiftRxError::Database(DatabaseError::ConnectionFailed { .. }) => {
                "Unable to open the training history. Please check your database path.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
    /// Informational message
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = LiftRxError::Validation(ValidationError::InvalidDuration { weeks: 8 });
        assert_eq!(err.severity(), ErrorSeverity::Warning);

        let err = LiftRxError::Internal("test".to_string());
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert_eq!(err.severity().to_tracing_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_error_retryable() {
        let err = LiftRxError::Database(DatabaseError::ConnectionFailed {
            reason: "locked".to_string(),
        });
        assert!(err.is_retryable());

        let err = LiftRxError::Validation(ValidationError::UnknownGoal {
            goal: "yoga".to_string(),
        });
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_user_messages() {
        let err = LiftRxError::from(ValidationError::InvalidDuration { weeks: 3 });
        assert!(err.user_message().contains("4 to 6 weeks"));

        let err = LiftRxError::from(ValidationError::UnknownGoal {
            goal: "yoga".to_string(),
        });
        assert!(err.user_message().contains("yoga"));
    }

    #[test]
    fn test_range_checks() {
        assert!(ValidationError::check_range("energy_level", 5.0, 1.0, 10.0).is_ok());
        assert_eq!(
            ValidationError::check_range("energy_level", 11.0, 1.0, 10.0),
            Err(ValidationError::OutOfRange {
                field: "energy_level".to_string(),
                value: 11.0,
                min: 1.0,
                max: 10.0,
            })
        );
        assert!(matches!(
            ValidationError::check_range("rho", f64::NAN, 0.0, 1.0),
            Err(ValidationError::NonFinite { .. })
        ));
        assert!(ValidationError::check_finite("hrv_now", f64::INFINITY).is_err());
    }
}
