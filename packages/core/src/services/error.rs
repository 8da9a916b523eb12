//! Service Layer Error Types
//!
//! One error enum covers every manager operation. The variants split into
//! two families:
//!
//! - **Recoverable**: expected outcomes a caller handles in its normal flow
//!   (validation failures, revision conflicts, lookup misses, double
//!   deletes, malformed reference input, missing stream capability).
//! - **Unrecoverable**: environment or configuration damage for the current
//!   operation (storage failures, corrupted persisted records, unknown type
//!   tags, writes on a read-only manager). The caller decides whether to
//!   crash, alert, or circuit-break; the core never exits the process and
//!   never retries silently.

use crate::db::DatabaseError;
use crate::models::{Reference, ReferenceError};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Manager operation errors
#[derive(Error, Debug)]
pub enum NodeManagerError {
    /// One or more field rules failed
    #[error("node validation failed: {0:?}")]
    Validation(FieldErrors),

    /// Optimistic-concurrency conflict; reload the node and retry
    #[error("revision conflict for node {uuid}: stored revision {stored}, held revision {held}")]
    Revision {
        uuid: Reference,
        stored: i64,
        held: i64,
    },

    /// Lookup miss
    #[error("node not found: {uuid}")]
    NotFound { uuid: Reference },

    /// Operation on a node that is already soft-deleted
    #[error("node already deleted: {uuid}")]
    AlreadyDeleted { uuid: Reference },

    /// Malformed identity string
    #[error(transparent)]
    InvalidReference(#[from] ReferenceError),

    /// Stream operation requested on a type without the capability
    #[error("no stream handler defined for type {node_type}")]
    NoStreamHandler { node_type: String },

    /// Save attempted through a read-only manager
    #[error("the manager is read-only, cannot alter the datastore")]
    ReadOnly,

    /// No handler registered for the type tag; a configuration error
    #[error("no handler registered for type {node_type}")]
    UnknownType { node_type: String },

    /// A persisted record failed to deserialize
    #[error("corrupted record {uuid}: {context}")]
    Corrupted { uuid: Reference, context: String },

    /// Binary stream storage or retrieval failed
    #[error("stream storage failed: {context}")]
    StreamStorage { context: String },

    /// Storage failure
    #[error("storage failure: {0}")]
    Database(#[from] DatabaseError),
}

impl NodeManagerError {
    /// Create a corrupted record error
    pub fn corrupted(uuid: Reference, context: impl Into<String>) -> Self {
        Self::Corrupted {
            uuid,
            context: context.into(),
        }
    }

    /// Create a stream storage error
    pub fn stream_storage(context: impl Into<String>) -> Self {
        Self::StreamStorage {
            context: context.into(),
        }
    }

    /// Whether a caller is expected to handle this error in its normal flow
    ///
    /// Unrecoverable errors indicate environment or configuration damage and
    /// should be escalated rather than handled inline.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Revision { .. }
                | Self::NotFound { .. }
                | Self::AlreadyDeleted { .. }
                | Self::InvalidReference(_)
                | Self::NoStreamHandler { .. }
        )
    }
}

/// Field-keyed validation message collection
///
/// Validation accumulates every violation instead of stopping at the first,
/// so independent problems are reported together. Handlers append to the
/// same collection the built-in checks use, keyed by field path (for payload
/// fields the convention is `data.<field>`).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldErrors {
    errors: HashMap<String, Vec<String>>,
}

impl FieldErrors {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message against a field
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    /// Whether a specific field has at least one message
    pub fn has_error(&self, field: &str) -> bool {
        self.errors.get(field).is_some_and(|m| !m.is_empty())
    }

    /// Messages recorded against a field
    pub fn get_error(&self, field: &str) -> &[String] {
        self.errors.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether any field has at least one message
    pub fn has_errors(&self) -> bool {
        self.errors.values().any(|m| !m.is_empty())
    }

    /// Number of fields with at least one message
    pub fn len(&self) -> usize {
        self.errors.values().filter(|m| !m.is_empty()).count()
    }

    /// Whether the collection is empty
    pub fn is_empty(&self) -> bool {
        !self.has_errors()
    }
}
