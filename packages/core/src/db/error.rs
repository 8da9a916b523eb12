//! Database Error Types
//!
//! Error types for connection, schema bootstrap, and statement execution.
//! These are environment failures: the service layer treats them as
//! unrecoverable for the operation in flight.

use std::path::PathBuf;
use thiserror::Error;

/// Database operation errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish the database connection
    #[error("failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to create the parent directory of the database file
    #[error("failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),

    /// Statement execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecutionError { context: String },

    /// Row value could not be converted into its model type
    #[error("row conversion failed: {context}")]
    RowConversionError { context: String },
}

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecutionError {
            context: context.into(),
        }
    }

    /// Create a row conversion error with context
    pub fn row_conversion(context: impl Into<String>) -> Self {
        Self::RowConversionError {
            context: context.into(),
        }
    }
}
