//! Business Services
//!
//! The orchestration layer over the data model and the database:
//!
//! - [`NodeManager`] - the single read/write authority enforcing validation,
//!   optimistic concurrency, and the audit trail
//! - [`NotificationBus`] - channel-based pub/sub carrying domain events and
//!   ad hoc work requests between the manager and asynchronous listeners
//! - [`NodeManagerError`] / [`FieldErrors`] - operation errors and the
//!   validation side-channel

pub mod error;
pub mod node_manager;
pub mod notification;

pub use error::{FieldErrors, NodeManagerError};
pub use node_manager::{ManagerConfig, NodeManager};
pub use notification::{
    quote_payload, ListenerAction, ListenerError, Notification, NotificationBus,
    NotificationError, NotificationListener,
};
