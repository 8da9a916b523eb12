//! NodeRepo Core - Versioned Node Storage Engine
//!
//! This crate provides the storage core of the NodeRepo content repository:
//! arbitrary typed documents ("nodes") persisted in an embedded SQL store
//! with optimistic concurrency, a full append-only audit history, and an
//! event-notification mechanism that lets type-specific logic react
//! asynchronously to writes.
//!
//! # Architecture
//!
//! - **Universal node**: one row shape for every content type; a type tag
//!   selects the handler, payloads are JSON documents
//! - **Revisioned writes**: every update compares revisions, archives the
//!   previous row into an audit mirror, and bumps the revision by one
//! - **Handler dispatch**: per-type lifecycle hooks and optional stream
//!   capabilities, resolved through an explicit registry
//! - **Notification bus**: commits publish domain events on named channels;
//!   a cooperative receive loop dispatches them to registered listeners
//!
//! # Modules
//!
//! - [`models`] - data structures (Node, Reference, ModelEvent)
//! - [`handlers`] - per-type handler system and built-in handlers
//! - [`services`] - NodeManager and the NotificationBus
//! - [`db`] - database layer with libsql integration

pub mod db;
pub mod handlers;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use handlers::*;
pub use models::*;
pub use services::*;
