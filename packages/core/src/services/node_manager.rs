//! Node Manager - The Write Authority
//!
//! `NodeManager` is the single authority for reading and writing nodes. It
//! enforces the three storage invariants:
//!
//! - **Optimistic concurrency**: `revision` is compared against the stored
//!   row, never recomputed; a stale caller gets a revision conflict and no
//!   write happens.
//! - **Audit trail**: every committed revision leaves exactly one immutable
//!   row in the audit mirror - the insert itself, and the pre-update
//!   snapshot of every later save.
//! - **Soft deletion**: deletion is a normal update that flips the `deleted`
//!   flag; no operation here removes rows.
//!
//! The manager is also the sole emitter of domain events: after a write
//! becomes visible, a [`ModelEvent`] is published on the
//! `<prefix>_manager_action` channel.
//!
//! # Update atomicity
//!
//! The update path archives the stored row into the audit mirror and then
//! rewrites the current row. With `atomic_updates` (the default) both
//! statements run in one transaction; disabling it reproduces the historical
//! behavior of two independent statements, where a crash between them leaves
//! an extra audit row.

use crate::db::{parse_timestamp, DatabaseError, DatabaseService, NodeSelect, NODE_COLUMNS};
use crate::handlers::HandlerRegistry;
use crate::models::{ModelAction, ModelEvent, Node, Reference, STATUS_MAX};
use crate::services::error::{FieldErrors, NodeManagerError};
use crate::services::notification::{quote_payload, NotificationBus};
use chrono::{DateTime, Utc};
use libsql::Value;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Manager behavior switches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Reject every save with a policy violation
    pub read_only: bool,
    /// Wrap the audit-archive + current-row pair of the update path in one
    /// transaction
    pub atomic_updates: bool,
    /// Page size used by the batch soft-delete loop
    pub remove_page_size: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            atomic_updates: true,
            remove_page_size: 1024,
        }
    }
}

/// Orchestrates validation, concurrency-checked writes, audit persistence,
/// soft deletion, and event emission
///
/// Cheap to clone; clones share the database handle, the handler registry,
/// and the notification bus.
#[derive(Clone)]
pub struct NodeManager {
    db: DatabaseService,
    handlers: Arc<HandlerRegistry>,
    bus: NotificationBus,
    config: ManagerConfig,
}

impl NodeManager {
    /// Assemble a manager from its collaborators
    pub fn new(
        db: DatabaseService,
        handlers: Arc<HandlerRegistry>,
        bus: NotificationBus,
        config: ManagerConfig,
    ) -> Self {
        Self {
            db,
            handlers,
            bus,
            config,
        }
    }

    /// Handler registry this manager dispatches through
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Notification bus this manager publishes on
    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    /// Underlying database service
    pub fn database(&self) -> &DatabaseService {
        &self.db
    }

    /// Active configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Channel every [`ModelEvent`] is published on
    pub fn action_channel(&self) -> String {
        format!("{}_manager_action", self.db.prefix())
    }

    /// Query-builder seed over the current-row store
    pub fn select_builder(&self) -> NodeSelect {
        NodeSelect::from_table(self.db.nodes_table())
    }

    /// Query-builder seed over the audit mirror
    pub fn audit_select_builder(&self) -> NodeSelect {
        NodeSelect::from_table(self.db.audit_table())
    }

    /// Build an empty node of a registered type
    pub fn new_node(&self, node_type: &str) -> Result<Node, NodeManagerError> {
        self.handlers.new_instance(node_type)
    }

    /// Single lookup by identity
    pub async fn find(&self, uuid: Reference) -> Result<Option<Node>, NodeManagerError> {
        self.find_one_by(self.select_builder().where_eq("uuid", uuid.to_hyphenated()))
            .await
    }

    /// Bounded, caller-ordered listing
    ///
    /// Rows whose payloads fail to deserialize are corrupted records: they
    /// are logged and skipped, never silently defaulted. Scan-level
    /// failures (storage or column conversion) abort the operation.
    pub async fn find_by(
        &self,
        select: NodeSelect,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Node>, NodeManagerError> {
        let (sql, params) = select.limit(limit).offset(offset).to_sql(NODE_COLUMNS);
        tracing::debug!(%sql, "find_by");

        let conn = self.db.connect().await?;
        let mut rows = conn
            .query(&sql, libsql::params_from_iter(params))
            .await
            .map_err(DatabaseError::from)?;

        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await.map_err(DatabaseError::from)? {
            match self.hydrate(&row) {
                Ok(node) => nodes.push(node),
                Err(e @ NodeManagerError::Corrupted { .. }) => {
                    tracing::error!("skipping corrupted record: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(nodes)
    }

    /// First match of a query, if any
    ///
    /// More than one match is not an error; the first row under the caller's
    /// ordering wins.
    pub async fn find_one_by(&self, select: NodeSelect) -> Result<Option<Node>, NodeManagerError> {
        Ok(self.find_by(select, 0, 1).await?.into_iter().next())
    }

    /// Audit rows for one uuid, newest revision first
    pub async fn find_revisions(
        &self,
        uuid: Reference,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Node>, NodeManagerError> {
        let select = self
            .audit_select_builder()
            .where_eq("uuid", uuid.to_hyphenated())
            .order_by("revision", "DESC");
        self.find_by(select, offset, limit).await
    }

    /// Run built-in field checks, then the type handler's checks
    ///
    /// Returns `(false, errors)` when any field has at least one recorded
    /// message. The handler step is skipped for an empty type tag (already a
    /// field error); an unknown non-empty tag is a configuration error.
    pub async fn validate(
        &self,
        node: &Node,
    ) -> Result<(bool, FieldErrors), NodeManagerError> {
        let mut errors = FieldErrors::new();

        if node.name.is_empty() {
            errors.add_error("name", "Name cannot be empty");
        }

        if node.slug.is_empty() {
            errors.add_error("slug", "Slug cannot be empty");
        }

        if node.node_type.is_empty() {
            errors.add_error("type", "Type cannot be empty");
        }

        if node.status < 0 || node.status > STATUS_MAX {
            errors.add_error("status", "Invalid status");
        }

        if !node.node_type.is_empty() {
            let handler = self.handlers.get(node)?;
            handler.validate(node, self, &mut errors).await;
        }

        Ok((!errors.has_errors(), errors))
    }

    /// Persist a node: insert when unsaved, concurrency-checked update
    /// otherwise
    ///
    /// Insert path: assign uuid and slug defaults, `pre_insert`, write the
    /// current row and its audit mirror, `post_insert`, publish `Create`.
    ///
    /// Update path: `pre_update`, reload the stored row, compare revisions
    /// (a mismatch aborts with [`NodeManagerError::Revision`] and **no
    /// write**), archive the stored row stamped now, bump the revision,
    /// carry `created_at` forward, rewrite the current row, `post_update`,
    /// publish `Update`.
    pub async fn save(&self, mut node: Node) -> Result<Node, NodeManagerError> {
        if self.config.read_only {
            return Err(NodeManagerError::ReadOnly);
        }

        let handler = self.handlers.get(&node)?.clone();

        if !node.is_persisted() {
            if node.uuid.is_empty() {
                node.uuid = Reference::new_random();
            }
            if node.slug.is_empty() {
                node.slug = node.uuid.to_hyphenated();
            }

            handler.pre_insert(&mut node, self).await?;

            let conn = self.db.connect().await?;
            node.id = self
                .db
                .insert_node(&conn, &self.db.nodes_table(), &node)
                .await?;
            // Mirror row; the audit store keeps its own id sequence.
            self.db
                .insert_node(&conn, &self.db.audit_table(), &node)
                .await?;

            tracing::info!(uuid = %node.uuid, node_type = %node.node_type, "creating node");

            handler.post_insert(&mut node, self).await?;

            self.send_model_event(ModelAction::Create, &node);

            return Ok(node);
        }

        handler.pre_update(&mut node, self).await?;

        tracing::info!(uuid = %node.uuid, node_type = %node.node_type, "updating node");

        let stored = self
            .find(node.uuid)
            .await?
            .ok_or(NodeManagerError::NotFound { uuid: node.uuid })?;

        if stored.revision != node.revision {
            return Err(NodeManagerError::Revision {
                uuid: node.uuid,
                stored: stored.revision,
                held: node.revision,
            });
        }

        let now = Utc::now();

        let mut archived = stored;
        archived.updated_at = now;

        node.revision += 1;
        node.created_at = archived.created_at;
        node.updated_at = now;

        let conn = self.db.connect().await?;
        if self.config.atomic_updates {
            let tx = conn.transaction().await.map_err(DatabaseError::from)?;
            self.db
                .insert_node(&tx, &self.db.audit_table(), &archived)
                .await?;
            self.db
                .update_node(&tx, &self.db.nodes_table(), &node)
                .await?;
            tx.commit().await.map_err(DatabaseError::from)?;
        } else {
            self.db
                .insert_node(&conn, &self.db.audit_table(), &archived)
                .await?;
            self.db
                .update_node(&conn, &self.db.nodes_table(), &node)
                .await?;
        }

        handler.post_update(&mut node, self).await?;

        self.send_model_event(ModelAction::Update, &node);

        Ok(node)
    }

    /// Soft-delete one node through the normal save machinery
    ///
    /// Produces a new audit revision like any other update, then publishes a
    /// `SoftDelete` event carrying the final revision.
    pub async fn remove_one(&self, mut node: Node) -> Result<Node, NodeManagerError> {
        if node.deleted {
            return Err(NodeManagerError::AlreadyDeleted { uuid: node.uuid });
        }

        node.deleted = true;
        node.updated_at = Utc::now();

        tracing::info!(uuid = %node.uuid, node_type = %node.node_type, "soft delete");

        let node = self.save(node).await?;
        self.send_model_event(ModelAction::SoftDelete, &node);

        Ok(node)
    }

    /// Batch soft-delete: page through non-deleted matches until none remain
    ///
    /// One `SoftDelete` event per row; returns the number of rows flipped.
    pub async fn remove(&self, select: NodeSelect) -> Result<u64, NodeManagerError> {
        let select = select.where_clause("deleted != ?", vec![Value::Integer(1)]);
        let mut removed = 0u64;

        loop {
            let nodes = self
                .find_by(select.clone(), 0, self.config.remove_page_size)
                .await?;

            if nodes.is_empty() {
                return Ok(removed);
            }

            for mut node in nodes {
                node.deleted = true;
                node.updated_at = Utc::now();

                tracing::info!(uuid = %node.uuid, node_type = %node.node_type, "soft delete");

                let node = self.save(node).await?;
                self.send_model_event(ModelAction::SoftDelete, &node);
                removed += 1;
            }
        }
    }

    /// Low-level publish primitive
    ///
    /// The quoted wire form is logged; the queue delivers the payload
    /// verbatim.
    pub fn notify(&self, channel: &str, payload: &str) {
        tracing::info!(%channel, payload = %quote_payload(payload), "NOTIFY");
        self.bus.publish(channel, payload);
    }

    /// Serialize and publish a [`ModelEvent`] on the action channel
    fn send_model_event(&self, action: ModelAction, node: &Node) {
        let event = ModelEvent {
            node_type: node.node_type.clone(),
            name: node.name.clone(),
            action,
            subject: node.uuid,
            revision: node.revision,
            date: node.updated_at,
        };

        match serde_json::to_string(&event) {
            Ok(payload) => self.notify(&self.action_channel(), &payload),
            Err(e) => tracing::error!("failed to serialize model event: {e}"),
        }
    }

    /// Convert one storage row into a node
    ///
    /// Column order matches [`NODE_COLUMNS`]. Malformed stored references,
    /// timestamps, and payloads are corrupted-record conditions; column
    /// conversion failures are storage errors.
    fn hydrate(&self, row: &libsql::Row) -> Result<Node, NodeManagerError> {
        fn text(row: &libsql::Row, index: i32, name: &str) -> Result<String, DatabaseError> {
            row.get::<String>(index)
                .map_err(|e| DatabaseError::row_conversion(format!("column {name}: {e}")))
        }
        fn integer(row: &libsql::Row, index: i32, name: &str) -> Result<i64, DatabaseError> {
            row.get::<i64>(index)
                .map_err(|e| DatabaseError::row_conversion(format!("column {name}: {e}")))
        }

        let uuid_raw = text(row, 1, "uuid")?;
        let uuid = Reference::parse(&uuid_raw).map_err(|_| {
            NodeManagerError::corrupted(Reference::empty(), format!("invalid uuid: {uuid_raw}"))
        })?;

        let reference = |index: i32, name: &str| -> Result<Reference, NodeManagerError> {
            let raw = text(row, index, name)?;
            Reference::parse(&raw)
                .map_err(|_| NodeManagerError::corrupted(uuid, format!("invalid {name}: {raw}")))
        };
        let timestamp = |index: i32, name: &str| -> Result<DateTime<Utc>, NodeManagerError> {
            let raw = text(row, index, name)?;
            parse_timestamp(&raw)
                .map_err(|_| NodeManagerError::corrupted(uuid, format!("invalid {name}: {raw}")))
        };

        let mut node = Node {
            id: integer(row, 0, "id")?,
            uuid,
            node_type: text(row, 2, "type")?,
            name: text(row, 3, "name")?,
            revision: integer(row, 4, "revision")?,
            version: integer(row, 5, "version")?,
            created_at: timestamp(6, "created_at")?,
            updated_at: timestamp(7, "updated_at")?,
            set_uuid: reference(8, "set_uuid")?,
            parent_uuid: reference(9, "parent_uuid")?,
            slug: text(row, 10, "slug")?,
            created_by: reference(11, "created_by")?,
            updated_by: reference(12, "updated_by")?,
            data: serde_json::Value::Null,
            meta: serde_json::Value::Null,
            deleted: integer(row, 15, "deleted")? != 0,
            enabled: integer(row, 16, "enabled")? != 0,
            source: reference(17, "source")?,
            status: integer(row, 18, "status")?,
            weight: integer(row, 19, "weight")?,
        };

        let raw_data = text(row, 13, "data")?;
        let raw_meta = text(row, 14, "meta")?;

        let handler = self.handlers.get(&node)?;
        handler.load(&raw_data, &raw_meta, &mut node)?;

        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::DefaultHandler;
    use tempfile::TempDir;

    async fn document_manager(config: ManagerConfig) -> (NodeManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = DatabaseService::new(temp_dir.path().join("test.db"), "main")
            .await
            .unwrap();

        let mut registry = HandlerRegistry::new();
        registry.register("core.document", Arc::new(DefaultHandler));

        let manager = NodeManager::new(db, Arc::new(registry), NotificationBus::new(), config);
        (manager, temp_dir)
    }

    #[tokio::test]
    async fn test_builders_and_channel_use_prefix() {
        let (manager, _temp_dir) = document_manager(ManagerConfig::default()).await;

        assert_eq!(manager.action_channel(), "main_manager_action");
        assert_eq!(manager.select_builder().table(), "main_nodes");
        assert_eq!(manager.audit_select_builder().table(), "main_nodes_audit");
    }

    #[tokio::test]
    async fn test_read_only_manager_rejects_save() {
        let config = ManagerConfig {
            read_only: true,
            ..Default::default()
        };
        let (manager, _temp_dir) = document_manager(config).await;

        let node = manager.new_node("core.document").unwrap();
        let err = manager.save(node).await.unwrap_err();

        assert!(matches!(err, NodeManagerError::ReadOnly));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_validate_reports_all_builtin_violations() {
        let (manager, _temp_dir) = document_manager(ManagerConfig::default()).await;

        let mut node = Node::new("");
        node.status = 7;

        let (ok, errors) = manager.validate(&node).await.unwrap();
        assert!(!ok);
        assert_eq!(errors.len(), 4);
        assert!(errors.has_error("name"));
        assert!(errors.has_error("slug"));
        assert!(errors.has_error("type"));
        assert_eq!(errors.get_error("status"), ["Invalid status"]);
    }

    #[tokio::test]
    async fn test_validate_passes_complete_node() {
        let (manager, _temp_dir) = document_manager(ManagerConfig::default()).await;

        let mut node = manager.new_node("core.document").unwrap();
        node.name = "A document".to_string();
        node.slug = "a-document".to_string();

        let (ok, errors) = manager.validate(&node).await.unwrap();
        assert!(ok);
        assert!(!errors.has_errors());
    }
}
