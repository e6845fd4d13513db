//! Error types for dataset layout, configuration and block I/O.

use thiserror::Error;

/// Errors that can occur while building a dataset layout or talking to a backend.
///
/// Failures that happen while a query executes are not returned through this type: they are captured into the query's
/// status and message (see `Query::error_message`). This type is for everything the caller must handle up front.
#[derive(Error, Debug)]
pub enum IdxError {
    /// The bitmask pattern is malformed or does not fit the dataset.
    #[error("invalid bitmask: {0}")]
    InvalidBitmask(String),

    /// The layout described by an idx file is inconsistent.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// Text that should describe a layout, a field or a dtype could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A storage backend failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// The backend or the dtype does not support the operation.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// The operation was cancelled through its abort token.
    #[error("query aborted")]
    Aborted,

    /// Structured idx document error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl IdxError {
    /// Create an InvalidBitmask error.
    pub fn invalid_bitmask(msg: impl Into<String>) -> Self {
        Self::InvalidBitmask(msg.into())
    }

    /// Create an InvalidLayout error.
    pub fn invalid_layout(msg: impl Into<String>) -> Self {
        Self::InvalidLayout(msg.into())
    }

    /// Create a Parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a Backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a NotSupported error.
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns `true` iff this error is a cancellation rather than a failure.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Result type for dataset and backend operations.
pub type Result<T> = std::result::Result<T, IdxError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn messages_name_the_cause() {
        assert_eq!(IdxError::Aborted.to_string(), "query aborted");
        assert_eq!(
            IdxError::not_supported("write on a read-only access").to_string(),
            "not supported: write on a read-only access"
        );
        assert!(IdxError::Aborted.is_aborted());
        assert!(!IdxError::parse("x").is_aborted());
    }
}
