//! Error types for the in-memory client

use rowgate_common::{ErrorKind, RowGateError};
use thiserror::Error;

/// Result type alias using the client's error type
pub type Result<T> = std::result::Result<T, DbError>;

/// Errors raised by the in-memory client
#[derive(Error, Debug, Clone)]
pub enum DbError {
    /// Raised by the gate wrapping this client
    #[error(transparent)]
    Gate(#[from] RowGateError),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Table name {0} is used more than once in the same query; alias one of them")]
    DuplicateTableName(String),

    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    #[error("Duplicate value {key} for primary key of table {table}")]
    DuplicateKey { table: String, key: String },

    #[error("Invalid row for table {table}: {message}")]
    InvalidRow { table: String, message: String },

    #[error("Query returned no result")]
    NoResult,

    #[error("Transaction is no longer active")]
    TransactionClosed,

    #[error("Nested transactions are not supported")]
    NestedTransaction,

    #[error("Savepoint not found: {0}")]
    SavepointNotFound(String),
}

impl DbError {
    /// The gate error this wraps, if any
    pub fn gate(&self) -> Option<&RowGateError> {
        match self {
            DbError::Gate(err) => Some(err),
            _ => None,
        }
    }

    /// True when the gate refused the operation
    pub fn is_denial(&self) -> bool {
        self.gate().is_some_and(RowGateError::is_denial)
    }

    /// The gate's kind for gate errors; every client failure is an adapter error
    pub fn kind(&self) -> ErrorKind {
        self.gate().map_or(ErrorKind::Adapter, RowGateError::kind)
    }

    /// Error code (the gate's code for gate errors)
    pub fn code(&self) -> &'static str {
        match self {
            DbError::Gate(err) => err.code(),
            DbError::TableNotFound(_) | DbError::UnknownSchema(_) => "MEMORY_UNDEFINED_OBJECT",
            DbError::TableExists(_) | DbError::DuplicateTableName(_) => "MEMORY_DUPLICATE_OBJECT",
            DbError::DuplicateKey { .. } => "MEMORY_UNIQUE_VIOLATION",
            DbError::InvalidRow { .. } => "MEMORY_INVALID_ROW",
            DbError::NoResult => "MEMORY_NO_RESULT",
            DbError::TransactionClosed
            | DbError::NestedTransaction
            | DbError::SavepointNotFound(_) => "MEMORY_TRANSACTION_STATE",
        }
    }
}
