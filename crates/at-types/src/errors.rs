use thiserror::Error;

/// Main error type for the autotune system
#[derive(Error, Debug)]
pub enum AtError {
    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// The target cannot perform the requested operation at all. Ends the
    /// tuning session for that target.
    #[error("Target {target} is incompatible: {reason}")]
    Incompatible { target: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl AtError {
    /// Whether this error must end the whole tuning session rather than a
    /// single trial.
    pub fn is_session_ending(&self) -> bool {
        matches!(
            self,
            AtError::Incompatible { .. }
                | AtError::Config(_)
                | AtError::Parameter(ParameterError::InvalidBounds { .. })
        )
    }
}

/// Parameter-space errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Parameter {name} = {value} is outside bounds [{min}, {max}]")]
    OutOfBounds {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid bounds for {name}: [{min}, {max}] (bounds must be finite with min < max)")]
    InvalidBounds { name: String, min: f64, max: f64 },

    #[error("Unknown parameter: {name}")]
    UnknownParameter { name: String },

    #[error("Missing parameter: {name}")]
    MissingParameter { name: String },

    #[error("Duplicate parameter: {name}")]
    DuplicateParameter { name: String },

    #[error("Dimension mismatch: expected {expected} values, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Parameter space is empty")]
    EmptySpace,
}

/// Errors surfaced by the evaluation oracle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Evaluation timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Evaluation failed: {message}")]
    Failed { message: String },

    #[error("Target cannot perform this operation: {reason}")]
    Incompatible { reason: String },

    #[error("Unexpected oracle output: expected {expected}")]
    UnexpectedOutput { expected: String },
}

/// Result cache errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache directory unavailable: {path}: {message}")]
    DirectoryUnavailable { path: String, message: String },

    #[error("Corrupt cache entry {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Cache write failed for {key}: {message}")]
    WriteFailed { key: String, message: String },

    #[error("Parameters could not be canonicalized: {message}")]
    Canonicalization { message: String },
}

/// Result type alias for autotune operations
pub type AtResult<T> = Result<T, AtError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::AtError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::AtError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::AtError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ParameterError::OutOfBounds {
            name: "temperature".to_string(),
            value: 2.0,
            min: 0.1,
            max: 1.5,
        };

        let text = error.to_string();
        assert!(text.contains("temperature"));
        assert!(text.contains("outside bounds"));
        assert!(text.contains("1.5"));
    }

    #[test]
    fn test_error_conversion() {
        let param_error = ParameterError::UnknownParameter {
            name: "min_p".to_string(),
        };
        let at_error: AtError = param_error.into();

        match at_error {
            AtError::Parameter(_) => (),
            _ => panic!("Expected Parameter error"),
        }
    }

    #[test]
    fn test_session_ending_classification() {
        let incompatible = AtError::Incompatible {
            target: "embed-only".into(),
            reason: "does not support generation".into(),
        };
        assert!(incompatible.is_session_ending());
        assert!(config_error!("empty candidate list").is_session_ending());

        let timeout: AtError = EvaluationError::Timeout { timeout_ms: 1000 }.into();
        assert!(!timeout.is_session_ending());

        let out_of_bounds: AtError = ParameterError::OutOfBounds {
            name: "top_p".into(),
            value: 1.2,
            min: 0.5,
            max: 1.0,
        }
        .into();
        assert!(!out_of_bounds.is_session_ending());
    }

    #[test]
    fn test_macros() {
        let err = validation_error!("score for {} is NaN", "temperature=0.7");
        assert!(matches!(err, AtError::Validation(ref m) if m.contains("NaN")));
        assert!(matches!(internal_error!("meminfo truncated"), AtError::Internal(_)));
        assert_eq!(
            config_error!("ttl must be at least {} hour", 1).to_string(),
            "Configuration error: ttl must be at least 1 hour"
        );
    }
}
