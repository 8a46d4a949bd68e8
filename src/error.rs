//! Error types for Rivulet.

use std::fmt;

use thiserror::Error;

/// Root error type for Rivulet operations.
#[derive(Error, Debug)]
pub enum RivuletError {
    /// Errors delivered through a stream's error channel
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Errors raised while releasing resources
    #[error("Unsubscription error: {0}")]
    Unsubscription(#[from] UnsubscriptionError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

/// Errors carried by the error channel of a stream.
///
/// Stream errors are terminal: once one is delivered the subscription is over.
/// They are cloned when one failure must reach several observers (for example
/// every open window of a windowing operator).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Application-level failure
    #[error("{0}")]
    Message(String),

    /// A bounded hand-off buffer had no room for the next value
    #[error("Buffer overflow: capacity {capacity} exceeded")]
    Overflow { capacity: usize },

    /// The receiving end of a bridge was dropped
    #[error("Receiver disconnected")]
    Disconnected,

    /// An operator was configured with invalid parameters
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl StreamError {
    /// Create a message error.
    pub fn message(msg: impl Into<String>) -> Self {
        StreamError::Message(msg.into())
    }
}

impl From<String> for StreamError {
    fn from(msg: String) -> Self {
        StreamError::Message(msg)
    }
}

impl From<&str> for StreamError {
    fn from(msg: &str) -> Self {
        StreamError::Message(msg.to_string())
    }
}

/// Aggregate of every teardown failure seen during one `unsubscribe()` call.
///
/// Errors are kept in child order; aggregates raised by nested subscriptions
/// are flattened into their parent's list.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct UnsubscriptionError {
    errors: Vec<StreamError>,
}

impl UnsubscriptionError {
    /// Create an aggregate from the collected errors.
    pub fn new(errors: Vec<StreamError>) -> Self {
        Self { errors }
    }

    /// The individual failures, in child order.
    pub fn errors(&self) -> &[StreamError] {
        &self.errors
    }

    /// Consume the aggregate, returning the individual failures.
    pub fn into_errors(self) -> Vec<StreamError> {
        self.errors
    }
}

impl fmt::Display for UnsubscriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error(s) occurred during unsubscription",
            self.errors.len()
        )?;
        for (i, err) in self.errors.iter().enumerate() {
            write!(f, "\n  {}) {}", i + 1, err)?;
        }
        Ok(())
    }
}

/// Errors raised by configuration validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field holds a value outside its allowed range
    #[error("{field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type alias for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type alias for general Rivulet operations.
pub type RivuletResult<T> = Result<T, RivuletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsubscription_error_display() {
        let err = UnsubscriptionError::new(vec![
            StreamError::message("first"),
            StreamError::message("second"),
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 error(s)"));
        assert!(msg.contains("1) first"));
        assert!(msg.contains("2) second"));
    }

    #[test]
    fn test_root_error_conversions() {
        let err: RivuletError = StreamError::Disconnected.into();
        assert!(matches!(err, RivuletError::Stream(StreamError::Disconnected)));

        let err: RivuletError = ConfigError::invalid("span", "must be positive").into();
        assert_eq!(err.to_string(), "Configuration error: span: must be positive");
    }

    #[test]
    fn test_stream_error_from_str() {
        let err: StreamError = "boom".into();
        assert_eq!(err, StreamError::message("boom"));
        assert_eq!(err.to_string(), "boom");
    }
}
