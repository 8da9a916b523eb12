//! Database Connection Management
//!
//! Connection bootstrap and row statements for the node stores, using an
//! embedded libsql database.
//!
//! # Architecture
//!
//! - **Two tables per prefix**: `<prefix>_nodes` holds exactly one row per
//!   node uuid (the latest revision); `<prefix>_nodes_audit` is the
//!   append-only mirror holding one immutable row per revision ever
//!   committed.
//! - **WAL mode**: Write-Ahead Logging for better concurrency, with a busy
//!   timeout so concurrent writers wait instead of failing with
//!   `SQLITE_BUSY`.
//! - **Shared statements**: both tables carry the same column set, so the
//!   insert statement is reused for the current store and the audit mirror.
//!
//! All mutation goes through the node manager; this layer only knows rows.

use crate::db::error::DatabaseError;
use crate::models::Node;
use chrono::{DateTime, NaiveDateTime, Utc};
use libsql::{Builder, Connection, Database, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// Canonical column list, shared by the current store and the audit mirror
pub const NODE_COLUMNS: &str = "id, uuid, type, name, revision, version, created_at, updated_at, \
     set_uuid, parent_uuid, slug, created_by, updated_by, data, meta, \
     deleted, enabled, source, status, weight";

/// Database service owning the libsql handle and the node schema
///
/// # Examples
///
/// ```no_run
/// use noderepo_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db = DatabaseService::new(PathBuf::from("./data/noderepo.db"), "main").await?;
///     let conn = db.connect().await?;
///     # let _ = conn;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseService {
    db: Arc<Database>,
    db_path: PathBuf,
    prefix: String,
}

impl DatabaseService {
    /// Open (or create) the database and bootstrap the node schema
    ///
    /// Creates the parent directory if needed, opens the file, and runs the
    /// idempotent `CREATE TABLE IF NOT EXISTS` bootstrap for the current
    /// store and the audit mirror.
    pub async fn new(db_path: PathBuf, prefix: impl Into<String>) -> Result<Self, DatabaseError> {
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
            prefix: prefix.into(),
        };

        service.initialize_schema().await?;

        Ok(service)
    }

    /// Table prefix this service was opened with
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Path of the underlying database file
    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Name of the current-row store
    pub fn nodes_table(&self) -> String {
        format!("{}_nodes", self.prefix)
    }

    /// Name of the append-only audit mirror
    pub fn audit_table(&self) -> String {
        format!("{}_nodes_audit", self.prefix)
    }

    /// Open a connection with the busy timeout applied
    ///
    /// Use one connection per operation; the tokio runtime may move futures
    /// between threads, and the busy timeout lets concurrent writers wait on
    /// the WAL lock instead of failing immediately.
    pub async fn connect(&self) -> Result<Connection, DatabaseError> {
        let conn = self.db.connect()?;
        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000")
            .await?;
        Ok(conn)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so query() must be used instead of
    /// execute().
    async fn execute_pragma(&self, conn: &Connection, pragma: &str) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("failed to prepare '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Create tables and indexes, idempotently
    async fn initialize_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        let nodes = self.nodes_table();
        let audit = self.audit_table();

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {nodes} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL,
                    type TEXT NOT NULL,
                    name TEXT NOT NULL DEFAULT '',
                    revision INTEGER NOT NULL DEFAULT 1,
                    version INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    set_uuid TEXT NOT NULL,
                    parent_uuid TEXT NOT NULL,
                    slug TEXT NOT NULL,
                    created_by TEXT NOT NULL,
                    updated_by TEXT NOT NULL,
                    data JSON NOT NULL DEFAULT '{{}}',
                    meta JSON NOT NULL DEFAULT '{{}}',
                    deleted INTEGER NOT NULL DEFAULT 0,
                    enabled INTEGER NOT NULL DEFAULT 1,
                    source TEXT NOT NULL,
                    status INTEGER NOT NULL DEFAULT 0,
                    weight INTEGER NOT NULL DEFAULT 0,
                    CONSTRAINT {nodes}_slug UNIQUE (parent_uuid, slug, revision),
                    CONSTRAINT {nodes}_uuid UNIQUE (revision, uuid)
                )"
            ),
            (),
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("failed to create {nodes}: {e}")))?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {audit} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL,
                    type TEXT NOT NULL,
                    name TEXT NOT NULL DEFAULT '',
                    revision INTEGER NOT NULL DEFAULT 1,
                    version INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    set_uuid TEXT NOT NULL,
                    parent_uuid TEXT NOT NULL,
                    slug TEXT NOT NULL,
                    created_by TEXT NOT NULL,
                    updated_by TEXT NOT NULL,
                    data JSON NOT NULL DEFAULT '{{}}',
                    meta JSON NOT NULL DEFAULT '{{}}',
                    deleted INTEGER NOT NULL DEFAULT 0,
                    enabled INTEGER NOT NULL DEFAULT 1,
                    source TEXT NOT NULL,
                    status INTEGER NOT NULL DEFAULT 0,
                    weight INTEGER NOT NULL DEFAULT 0
                )"
            ),
            (),
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("failed to create {audit}: {e}")))?;

        conn.execute(
            &format!("CREATE INDEX IF NOT EXISTS {nodes}_uuid_idx ON {nodes}(uuid)"),
            (),
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("failed to create uuid index: {e}")))?;

        conn.execute(
            &format!("CREATE INDEX IF NOT EXISTS {audit}_uuid_idx ON {audit}(uuid)"),
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("failed to create audit uuid index: {e}"))
        })?;

        Ok(())
    }

    /// Insert one node row and return its storage id
    ///
    /// Used for both the current store and the audit mirror; the caller
    /// picks the table. Runs on the supplied connection so it can take part
    /// in a caller-owned transaction.
    pub async fn insert_node(
        &self,
        conn: &Connection,
        table: &str,
        node: &Node,
    ) -> Result<i64, DatabaseError> {
        let sql = format!(
            "INSERT INTO {table} (uuid, type, revision, version, name, created_at, updated_at, \
             set_uuid, parent_uuid, slug, created_by, updated_by, data, meta, \
             deleted, enabled, source, status, weight) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING id"
        );

        let mut rows = conn
            .query(&sql, libsql::params_from_iter(write_params(node)?))
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("failed to insert into {table}: {e}"))
            })?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("insert returned no id: {e}")))?
            .ok_or_else(|| DatabaseError::sql_execution("insert returned no id"))?;

        row.get::<i64>(0)
            .map_err(|e| DatabaseError::row_conversion(format!("failed to read inserted id: {e}")))
    }

    /// Rewrite the current row of an already-persisted node
    pub async fn update_node(
        &self,
        conn: &Connection,
        table: &str,
        node: &Node,
    ) -> Result<(), DatabaseError> {
        let sql = format!(
            "UPDATE {table} SET uuid = ?, type = ?, revision = ?, version = ?, name = ?, \
             created_at = ?, updated_at = ?, set_uuid = ?, parent_uuid = ?, slug = ?, \
             created_by = ?, updated_by = ?, data = ?, meta = ?, deleted = ?, enabled = ?, \
             source = ?, status = ?, weight = ? \
             WHERE id = ?"
        );

        let mut params = write_params(node)?;
        params.push(Value::Integer(node.id));

        conn.execute(&sql, libsql::params_from_iter(params))
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("failed to update {table}: {e}")))?;

        Ok(())
    }
}

/// Render a node into the bound parameters of the shared write statements
///
/// Parameter order matches the column order of [`DatabaseService::insert_node`]
/// and [`DatabaseService::update_node`].
fn write_params(node: &Node) -> Result<Vec<Value>, DatabaseError> {
    let data = serde_json::to_string(&node.data)
        .map_err(|e| DatabaseError::row_conversion(format!("failed to serialize data: {e}")))?;
    let meta = serde_json::to_string(&node.meta)
        .map_err(|e| DatabaseError::row_conversion(format!("failed to serialize meta: {e}")))?;

    Ok(vec![
        Value::Text(node.uuid.to_hyphenated()),
        Value::Text(node.node_type.clone()),
        Value::Integer(node.revision),
        Value::Integer(node.version),
        Value::Text(node.name.clone()),
        Value::Text(node.created_at.to_rfc3339()),
        Value::Text(node.updated_at.to_rfc3339()),
        Value::Text(node.set_uuid.to_hyphenated()),
        Value::Text(node.parent_uuid.to_hyphenated()),
        Value::Text(node.slug.clone()),
        Value::Text(node.created_by.to_hyphenated()),
        Value::Text(node.updated_by.to_hyphenated()),
        Value::Text(data),
        Value::Text(meta),
        Value::Integer(node.deleted as i64),
        Value::Integer(node.enabled as i64),
        Value::Text(node.source.to_hyphenated()),
        Value::Integer(node.status),
        Value::Integer(node.weight),
    ])
}

/// Parse a stored timestamp - handles both RFC 3339 and the bare SQLite
/// `CURRENT_TIMESTAMP` format (`YYYY-MM-DD HH:MM:SS`)
pub(crate) fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }

    Err(DatabaseError::row_conversion(format!(
        "unable to parse timestamp '{text}'"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        let rfc = Utc::now().to_rfc3339();
        assert!(parse_timestamp(&rfc).is_ok());
        assert!(parse_timestamp("2025-01-03 10:20:30").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_write_params_order_and_arity() {
        let node = Node::new("core.document");
        let params = write_params(&node).unwrap();

        // One parameter per non-id column of the shared statements.
        assert_eq!(params.len(), 19);
        assert_eq!(params[1], Value::Text("core.document".to_string()));
        assert_eq!(params[2], Value::Integer(1));
        assert_eq!(params[14], Value::Integer(0)); // deleted
        assert_eq!(params[15], Value::Integer(1)); // enabled
    }

    #[tokio::test]
    async fn test_schema_bootstrap_is_idempotent() -> anyhow::Result<()> {
        let temp_dir = tempfile::TempDir::new()?;
        let db_path = temp_dir.path().join("test.db");

        let first = DatabaseService::new(db_path.clone(), "main").await?;
        assert_eq!(first.nodes_table(), "main_nodes");
        assert_eq!(first.audit_table(), "main_nodes_audit");

        // Re-opening the same file must not fail on existing tables.
        let second = DatabaseService::new(db_path, "main").await?;
        let conn = second.connect().await?;
        let mut rows = conn.query("SELECT count(*) FROM main_nodes", ()).await?;
        let row = rows.next().await?.expect("count row");
        assert_eq!(row.get::<i64>(0)?, 0);

        Ok(())
    }
}
