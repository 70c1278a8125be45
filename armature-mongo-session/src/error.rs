//! Error types for session operations.

use std::fmt;
use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type for document collection operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Session store operation, used to label transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Session lookup
    Get,
    /// Session upsert
    Set,
    /// Single session removal
    Destroy,
    /// Record count
    Length,
    /// Removal of every record
    Clear,
    /// Removal of expired records
    Cleanup,
}

impl Operation {
    /// Get the operation name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Set => "set",
            Operation::Destroy => "destroy",
            Operation::Length => "length",
            Operation::Clear => "clear",
            Operation::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by a document collection backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// A query or command was rejected
    #[error("Query error: {0}")]
    Query(String),

    /// The server answered with a failure status
    #[error("Server error: {0}")]
    Server(String),

    /// A stored document does not have the session record shape
    #[error("Malformed document: {0}")]
    Malformed(String),

    /// MongoDB driver error
    #[cfg(feature = "mongodb")]
    #[error("MongoDB error: {0}")]
    MongoDb(#[from] mongodb::error::Error),

    /// HTTP request error (CouchDB)
    #[cfg(feature = "couchdb")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Session-specific errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Required configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid connection URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Backend client could not be created
    #[error("Connection error: {0}")]
    Connection(String),

    /// The document store failed while serving an operation
    #[error("Transport error during {operation}: {source}")]
    Transport {
        operation: Operation,
        #[source]
        source: StoreError,
    },

    /// Session object could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored payload could not be decoded
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl SessionError {
    /// Wrap a collection error with the operation that triggered it.
    pub fn transport(operation: Operation, source: StoreError) -> Self {
        Self::Transport { operation, source }
    }

    /// Check if this error came from the document store.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Check if this error is a configuration-time error.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::InvalidUrl(_))
    }

    /// Check if this error is a serialization error in either direction.
    pub fn is_serialization(&self) -> bool {
        matches!(self, Self::Serialization(_) | Self::Deserialization(_))
    }

    /// Get the failed operation for transport errors.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Self::Transport { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_is_labeled() {
        let err = SessionError::transport(
            Operation::Length,
            StoreError::Connection("connection refused".to_string()),
        );

        assert!(err.is_transport());
        assert_eq!(err.operation(), Some(Operation::Length));
        assert_eq!(
            err.to_string(),
            "Transport error during length: Connection error: connection refused"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(SessionError::Config("db".to_string()).is_config());
        assert!(SessionError::InvalidUrl("x".to_string()).is_config());
        assert!(SessionError::Deserialization("eof".to_string()).is_serialization());
        assert_eq!(SessionError::Serialization("x".to_string()).operation(), None);
    }
}
