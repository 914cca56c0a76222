//! Error types for the bridge.
//!
//! This module defines error codes, the structured [`JsError`] that crosses
//! the native/script boundary, and the main [`BridgeError`] type used
//! throughout the crate.

use serde::{Deserialize, Serialize};

/// Error codes for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Script failed to compile or threw while running
    ExecutionError,
    /// Raw exception text reported by the engine
    JsException,
    /// Wrong argument count, type or shape at a native hook boundary
    InvalidArgument,
    /// The script bundle does not honor the bridge calling convention
    ProtocolViolation,
    /// Operation issued against an executor in the wrong lifecycle state
    InvalidState,
    /// Serialization/deserialization error
    SerializationError,
    /// The engine work queue is gone
    QueueClosed,
    /// Internal error (engine creation, bugs)
    InternalError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::ExecutionError => write!(f, "EXECUTION_ERROR"),
            ErrorCode::JsException => write!(f, "JS_EXCEPTION"),
            ErrorCode::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            ErrorCode::ProtocolViolation => write!(f, "PROTOCOL_VIOLATION"),
            ErrorCode::InvalidState => write!(f, "INVALID_STATE"),
            ErrorCode::SerializationError => write!(f, "SERIALIZATION_ERROR"),
            ErrorCode::QueueClosed => write!(f, "QUEUE_CLOSED"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// Structured error carried across the native/script boundary.
///
/// Re-thrown errors keep their history in `cause`, so a script fault raised
/// while loading a bundle still exposes the engine's original exception text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsError {
    /// Error code
    pub code: ErrorCode,

    /// Human-readable message
    pub message: String,

    /// Script stack trace, when the engine produced one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,

    /// Identifying name of the script that was running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    /// The error this one was raised from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<JsError>>,
}

impl JsError {
    /// Create a new error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            stack: None,
            source_url: None,
            cause: None,
        }
    }

    /// Create a script execution error
    pub fn execution_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExecutionError, message)
    }

    /// Create an engine exception record
    pub fn js_exception(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::JsException, message)
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    /// Create a protocol violation error
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProtocolViolation, message)
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, message)
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Add stack trace
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Add the identifying script name
    pub fn with_source_url(mut self, source_url: impl Into<String>) -> Self {
        self.source_url = Some(source_url.into());
        self
    }

    /// Chain the error this one was raised from
    pub fn with_cause(mut self, cause: JsError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Walk the cause chain down to the innermost error
    pub fn root_cause(&self) -> &JsError {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }
}

impl std::fmt::Display for JsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(url) = &self.source_url {
            write!(f, " ({})", url)?;
        }
        Ok(())
    }
}

impl std::error::Error for JsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// Main error type for the bridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Error raised on the native/script boundary
    #[error("JS error: {0}")]
    Js(#[from] JsError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Work queue error
    #[error("Queue error: {0}")]
    Queue(String),
}

impl BridgeError {
    /// Convert to JsError for reporting across the boundary
    pub fn to_js_error(&self) -> JsError {
        match self {
            BridgeError::Js(e) => e.clone(),
            BridgeError::Config(e) => JsError::invalid_argument(e.to_string()),
            BridgeError::Io(e) => JsError::internal_error(e.to_string()),
            BridgeError::Serialization(msg) => {
                JsError::new(ErrorCode::SerializationError, msg.clone())
            }
            BridgeError::Queue(msg) => JsError::new(ErrorCode::QueueClosed, msg.clone()),
        }
    }

    /// The error code this error reports as
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::Js(e) => e.code,
            BridgeError::Config(_) => ErrorCode::InvalidArgument,
            BridgeError::Io(_) => ErrorCode::InternalError,
            BridgeError::Serialization(_) => ErrorCode::SerializationError,
            BridgeError::Queue(_) => ErrorCode::QueueClosed,
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
