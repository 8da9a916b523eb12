//! Node Query Builder
//!
//! `NodeSelect` is the query-builder seed handed out by the manager: a small
//! accumulating builder over one table that renders to parameterized SQL.
//! Callers add conditions and ordering; the manager supplies the column list
//! and the page bounds at execution time.
//!
//! Column and ordering identifiers are trusted input (they come from code,
//! not users); values always travel as bound parameters.

use libsql::Value;

/// Accumulating SELECT builder over one node table
#[derive(Debug, Clone)]
pub struct NodeSelect {
    table: String,
    clauses: Vec<String>,
    params: Vec<Value>,
    order: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl NodeSelect {
    /// Start a query over the given table
    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            clauses: Vec::new(),
            params: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Add an equality condition on a column
    pub fn where_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.clauses.push(format!("{column} = ?"));
        self.params.push(value.into());
        self
    }

    /// Add a raw condition with its bound parameters
    pub fn where_clause(mut self, clause: impl Into<String>, params: Vec<Value>) -> Self {
        self.clauses.push(clause.into());
        self.params.extend(params);
        self
    }

    /// Append an ordering term (`direction` is `ASC` or `DESC`)
    pub fn order_by(mut self, column: &str, direction: &str) -> Self {
        self.order.push(format!("{column} {direction}"));
        self
    }

    /// Bound the result set
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip leading rows
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Table this query reads from
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Render to SQL text plus bound parameters
    pub(crate) fn to_sql(&self, columns: &str) -> (String, Vec<Value>) {
        let mut sql = format!("SELECT {columns} FROM {}", self.table);

        if !self.clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.clauses.join(" AND "));
        }

        if !self.order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order.join(", "));
        }

        // SQLite requires LIMIT before OFFSET; -1 means unbounded.
        if self.limit.is_some() || self.offset.is_some() {
            let limit = self.limit.map(|l| l as i64).unwrap_or(-1);
            sql.push_str(&format!(" LIMIT {limit}"));
            if let Some(offset) = self.offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }

        (sql, self.params.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_select() {
        let (sql, params) = NodeSelect::from_table("main_nodes").to_sql("id, uuid");
        assert_eq!(sql, "SELECT id, uuid FROM main_nodes");
        assert!(params.is_empty());
    }

    #[test]
    fn test_conditions_join_with_and() {
        let (sql, params) = NodeSelect::from_table("main_nodes")
            .where_eq("type", "core.user")
            .where_clause("deleted != ?", vec![Value::Integer(1)])
            .to_sql("*");

        assert_eq!(
            sql,
            "SELECT * FROM main_nodes WHERE type = ? AND deleted != ?"
        );
        assert_eq!(params.len(), 2);
        assert_eq!(params[0], Value::Text("core.user".to_string()));
        assert_eq!(params[1], Value::Integer(1));
    }

    #[test]
    fn test_order_limit_offset() {
        let (sql, _) = NodeSelect::from_table("main_nodes")
            .order_by("weight", "DESC")
            .order_by("created_at", "ASC")
            .limit(10)
            .offset(20)
            .to_sql("uuid");

        assert_eq!(
            sql,
            "SELECT uuid FROM main_nodes ORDER BY weight DESC, created_at ASC LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn test_offset_without_limit_is_unbounded() {
        let (sql, _) = NodeSelect::from_table("main_nodes").offset(5).to_sql("uuid");
        assert_eq!(sql, "SELECT uuid FROM main_nodes LIMIT -1 OFFSET 5");
    }
}
