//! Node Data Structures
//!
//! This module defines the core `Node` struct: a versioned, typed document
//! with identity, hierarchy, and lifecycle metadata.
//!
//! # Architecture
//!
//! - **Universal row**: one struct represents every content type; the type
//!   tag selects a handler, not a table.
//! - **JSON payloads**: all type-specific state lives in the `data` and
//!   `meta` fields as JSON documents whose shapes are declared by the type's
//!   handler.
//! - **Revisions**: `revision` starts at 1 and increases by exactly one per
//!   successful update; it is the optimistic-concurrency token and the audit
//!   trail key. The storage id is crate-private and never leaves the
//!   process.

use crate::models::Reference;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Initial lifecycle stage of a freshly created node
pub const STATUS_NEW: i64 = 0;
/// Content exists but is not ready for publication
pub const STATUS_DRAFT: i64 = 1;
/// Content is complete, pending validation
pub const STATUS_COMPLETED: i64 = 2;
/// Content has been validated
pub const STATUS_VALIDATED: i64 = 3;

/// Highest valid lifecycle status value
pub const STATUS_MAX: i64 = STATUS_VALIDATED;

/// Handler metadata state: nothing to process
pub const PROCESS_STATUS_INIT: i64 = 0;
/// Handler metadata state: background work requested
pub const PROCESS_STATUS_UPDATE: i64 = 1;
/// Handler metadata state: background work finished
pub const PROCESS_STATUS_DONE: i64 = 2;
/// Handler metadata state: background work failed
pub const PROCESS_STATUS_ERROR: i64 = 3;

/// Versioned, typed document entity
///
/// A node is constructed through [`HandlerRegistry::new_instance`] (which
/// seeds `data`/`meta` with the type's declared shapes) or loaded from
/// storage, and persisted exclusively through `NodeManager::save`.
///
/// [`HandlerRegistry::new_instance`]: crate::handlers::HandlerRegistry::new_instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Storage row id; 0 means "not yet persisted". Never exposed.
    #[serde(skip)]
    pub(crate) id: i64,

    /// Public identity; assigned at first insert if empty
    pub uuid: Reference,

    /// Groups related nodes (e.g. translations of one logical entity)
    pub set_uuid: Reference,

    /// Hierarchy link to the parent node
    pub parent_uuid: Reference,

    /// Provenance link
    pub source: Reference,

    /// Type tag selecting the handler
    #[serde(rename = "type")]
    pub node_type: String,

    /// Human-readable name
    pub name: String,

    /// URL-safe identifier, unique within (parent_uuid, revision)
    pub slug: String,

    /// Optimistic-concurrency token; starts at 1
    pub revision: i64,

    /// Schema version of `data`/`meta`, handler-defined
    pub version: i64,

    /// Lifecycle stage, 0..=3
    pub status: i64,

    /// Caller-defined ordering key
    pub weight: i64,

    /// Type-specific business content
    pub data: Value,

    /// Type-specific derived/operational state
    pub meta: Value,

    /// Soft-delete flag; rows are never physically removed
    pub deleted: bool,

    /// Visibility flag, independent of `deleted`
    pub enabled: bool,

    /// Immutable after first insert
    pub created_at: DateTime<Utc>,

    /// Stamped on every write
    pub updated_at: DateTime<Utc>,

    /// Actor that created the node
    pub created_by: Reference,

    /// Actor that performed the latest write
    pub updated_by: Reference,
}

impl Node {
    /// Create an empty, unsaved node of the given type
    ///
    /// Payload shapes are empty objects; prefer the registry factory, which
    /// seeds them with the handler's declared defaults.
    pub fn new(node_type: impl Into<String>) -> Self {
        let now = Utc::now();

        Self {
            id: 0,
            uuid: Reference::empty(),
            set_uuid: Reference::empty(),
            parent_uuid: Reference::empty(),
            source: Reference::empty(),
            node_type: node_type.into(),
            name: String::new(),
            slug: String::new(),
            revision: 1,
            version: 1,
            status: STATUS_NEW,
            weight: 0,
            data: Value::Object(Default::default()),
            meta: Value::Object(Default::default()),
            deleted: false,
            enabled: true,
            created_at: now,
            updated_at: now,
            created_by: Reference::empty(),
            updated_by: Reference::empty(),
        }
    }

    /// Whether this node has been written to storage
    pub fn is_persisted(&self) -> bool {
        self.id != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_defaults() {
        let node = Node::new("core.document");

        assert_eq!(node.node_type, "core.document");
        assert_eq!(node.revision, 1);
        assert_eq!(node.version, 1);
        assert_eq!(node.status, STATUS_NEW);
        assert!(node.uuid.is_empty());
        assert!(!node.deleted);
        assert!(node.enabled);
        assert!(!node.is_persisted());
        assert!(node.data.is_object());
        assert!(node.meta.is_object());
    }

    #[test]
    fn test_storage_id_is_not_serialized() {
        let mut node = Node::new("core.document");
        node.id = 42;

        let json = serde_json::to_value(&node).unwrap();
        assert!(json.get("id").is_none());

        let back: Node = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, 0);
        assert!(!back.is_persisted());
    }

    #[test]
    fn test_type_tag_serializes_as_type() {
        let node = Node::new("core.user");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json.get("type").unwrap(), "core.user");
    }
}
