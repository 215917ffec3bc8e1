use thiserror::Error;

/// Boxed error from a backend client
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Reasons a raw payload is not a [`crate::QueueMessage`]
///
/// All variants describe malformed input. They are never fatal: the item is
/// dropped and the consume loop moves on.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The payload is not valid JSON
    #[error("Payload is not valid JSON: {0}")]
    Parse(#[source] serde_json::Error),

    /// The payload is valid JSON but not an object
    #[error("Payload is not a JSON object")]
    Shape,

    /// A required field is missing or has the wrong type
    #[error("Field `{field}` is missing or is not a {expected}")]
    Field {
        /// Wire name of the offending field
        field: &'static str,
        /// JSON type the field must have
        expected: &'static str,
    },

    /// `traceContext` is present but not a flat string map
    #[error("traceContext must be an object of string values")]
    TraceContext,
}

/// Error types for queue operations
#[derive(Error, Debug)]
pub enum QueueError {
    /// Network, auth or protocol failure talking to the backend
    #[error("Queue backend failed during {operation}")]
    Connection {
        /// Backend operation that failed
        operation: &'static str,
        /// Underlying client error
        #[source]
        source: BoxError,
    },

    /// Error serializing message to JSON
    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Payload failed validation
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] ValidationError),

    /// The caller-supplied handler returned an error
    #[error("Message handler failed: {0:#}")]
    Handler(anyhow::Error),

    /// Required configuration is missing or invalid
    #[error("Invalid queue configuration: {0}")]
    Configuration(String),
}

impl QueueError {
    /// Wraps a backend client error raised by `operation`
    pub fn connection(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Connection {
            operation,
            source: source.into(),
        }
    }
}
