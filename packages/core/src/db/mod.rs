//! Database Layer
//!
//! Storage plumbing for the node manager:
//!
//! - [`DatabaseService`] - libsql connection bootstrap and the shared row
//!   statements for the current store and the audit mirror
//! - [`NodeSelect`] - the query-builder seed handed to callers
//! - [`DatabaseError`] - environment failures, treated as unrecoverable by
//!   the service layer

mod database;
mod error;
mod query;

pub use database::{DatabaseService, NODE_COLUMNS};
pub use error::DatabaseError;
pub use query::NodeSelect;

pub(crate) use database::parse_timestamp;
