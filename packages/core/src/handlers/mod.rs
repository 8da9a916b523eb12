//! Node Handler System
//!
//! Polymorphic dispatch over node types:
//!
//! - [`NodeHandler`] - lifecycle hooks implemented per type tag
//! - [`DownloadHandler`] / [`StreamHandler`] - optional binary-stream
//!   capabilities, probed at resolution time rather than inherited
//! - [`HandlerRegistry`] - type tag to handler lookup and the node factory
//!
//! Handlers hold no per-call state: a registered handler is shared by
//! reference across every operation and must stay read-only after
//! registration. Hooks receive the manager so type logic can read related
//! nodes or publish follow-up work on ad hoc channels.

mod default;
mod media;
mod user;

pub use default::DefaultHandler;
pub use media::{
    detect_content_type, FetchError, ImageData, ImageDownloadListener, ImageHandler, ImageMeta,
    MediaFetcher, MEDIA_DOWNLOAD_CHANNEL,
};
pub use user::{UserData, UserHandler, UserMeta};

use crate::models::Node;
use crate::services::{FieldErrors, NodeManager, NodeManagerError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Metadata describing a downloadable binary for one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadData {
    /// Suggested file name, usually the node name
    pub filename: String,
    /// MIME type recorded when the stream was stored
    pub content_type: String,
}

/// Optional capability: the type can serve a stored binary stream
#[async_trait]
pub trait DownloadHandler: Send + Sync {
    /// Describe the binary attached to the node
    fn download_data(&self, node: &Node) -> DownloadData;

    /// Write the stored stream into `dest`
    async fn copy_to(
        &self,
        node: &Node,
        dest: &mut (dyn tokio::io::AsyncWrite + Unpin + Send),
    ) -> Result<u64, NodeManagerError>;
}

/// Optional capability: the type can persist an incoming binary stream
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// Consume `src` into the node's storage location and update its
    /// metadata; returns the number of bytes written
    async fn store_stream(
        &self,
        node: &mut Node,
        src: &mut (dyn tokio::io::AsyncRead + Unpin + Send),
    ) -> Result<u64, NodeManagerError>;
}

/// Per-type lifecycle hooks
///
/// Every hook has a no-op default so a handler only implements what its type
/// needs. The write lifecycle invokes them in a fixed order: `pre_insert` /
/// `pre_update` before any row is written, `post_insert` / `post_update`
/// after the write and before the domain event is published.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Zero-value `(data, meta)` payload shapes for this type
    fn default_payload(&self) -> (Value, Value) {
        (
            Value::Object(Default::default()),
            Value::Object(Default::default()),
        )
    }

    /// Deserialize persisted payload text into the node
    ///
    /// A malformed payload is a corrupted-record condition: callers log and
    /// skip the record, they never fall back to a default shape.
    fn load(&self, raw_data: &str, raw_meta: &str, node: &mut Node) -> Result<(), NodeManagerError> {
        node.data = serde_json::from_str(raw_data)
            .map_err(|e| NodeManagerError::corrupted(node.uuid, format!("data payload: {e}")))?;
        node.meta = serde_json::from_str(raw_meta)
            .map_err(|e| NodeManagerError::corrupted(node.uuid, format!("meta payload: {e}")))?;
        Ok(())
    }

    /// Accumulate type-specific validation messages
    async fn validate(&self, node: &Node, manager: &NodeManager, errors: &mut FieldErrors) {
        let _ = (node, manager, errors);
    }

    /// Invoked before the first insert of a node
    async fn pre_insert(&self, node: &mut Node, manager: &NodeManager) -> Result<(), NodeManagerError> {
        let _ = (node, manager);
        Ok(())
    }

    /// Invoked after the first insert, before the Create event
    async fn post_insert(&self, node: &mut Node, manager: &NodeManager) -> Result<(), NodeManagerError> {
        let _ = (node, manager);
        Ok(())
    }

    /// Invoked before the concurrency check on the update path
    async fn pre_update(&self, node: &mut Node, manager: &NodeManager) -> Result<(), NodeManagerError> {
        let _ = (node, manager);
        Ok(())
    }

    /// Invoked after the current row is rewritten, before the Update event
    async fn post_update(&self, node: &mut Node, manager: &NodeManager) -> Result<(), NodeManagerError> {
        let _ = (node, manager);
        Ok(())
    }

    /// Probe for the download capability; `None` means default handling
    fn download(&self) -> Option<&dyn DownloadHandler> {
        None
    }

    /// Probe for the stream-storage capability; `None` means default handling
    fn stream(&self) -> Option<&dyn StreamHandler> {
        None
    }
}

impl std::fmt::Debug for dyn NodeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NodeHandler")
    }
}

/// Type tag to handler lookup
///
/// Registration happens once at process assembly, before the registry is
/// shared behind an `Arc`; entries are immutable afterwards. Resolving an
/// unknown tag is a configuration error, surfaced as the unrecoverable
/// [`NodeManagerError::UnknownType`].
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a handler with a type tag
    pub fn register(&mut self, node_type: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(node_type.into(), handler);
    }

    /// Resolve the handler for a node by its type tag
    pub fn get(&self, node: &Node) -> Result<&Arc<dyn NodeHandler>, NodeManagerError> {
        self.get_by_type(&node.node_type)
    }

    /// Resolve a handler by type tag
    pub fn get_by_type(&self, node_type: &str) -> Result<&Arc<dyn NodeHandler>, NodeManagerError> {
        self.handlers
            .get(node_type)
            .ok_or_else(|| NodeManagerError::UnknownType {
                node_type: node_type.to_string(),
            })
    }

    /// Build an empty node of the given type with the handler's declared
    /// payload shapes
    pub fn new_instance(&self, node_type: &str) -> Result<Node, NodeManagerError> {
        let handler = self.get_by_type(node_type)?;
        let mut node = Node::new(node_type);
        let (data, meta) = handler.default_payload();
        node.data = data;
        node.meta = meta;
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_resolves_registered_types() {
        let mut registry = HandlerRegistry::new();
        registry.register("core.document", Arc::new(DefaultHandler));

        let node = Node::new("core.document");
        assert!(registry.get(&node).is_ok());
        assert!(registry.get_by_type("core.document").is_ok());
    }

    #[test]
    fn test_unknown_type_is_a_configuration_error() {
        let registry = HandlerRegistry::new();
        let err = registry.get_by_type("ghost").unwrap_err();

        assert!(matches!(
            err,
            NodeManagerError::UnknownType { ref node_type } if node_type == "ghost"
        ));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_new_instance_seeds_declared_payloads() {
        let mut registry = HandlerRegistry::new();
        registry.register("core.user", Arc::new(UserHandler::new()));

        let node = registry.new_instance("core.user").unwrap();
        assert_eq!(node.node_type, "core.user");
        assert_eq!(node.data["username"], "");
        assert_eq!(node.meta["password_cost"], 12);
    }

    #[test]
    fn test_default_load_rejects_malformed_payload() {
        let handler = DefaultHandler;
        let mut node = Node::new("core.document");

        let err = handler.load("{not json", "{}", &mut node).unwrap_err();
        assert!(matches!(err, NodeManagerError::Corrupted { .. }));
        assert!(!err.is_recoverable());

        handler.load("{\"a\": 1}", "{}", &mut node).unwrap();
        assert_eq!(node.data, json!({"a": 1}));
    }

    #[test]
    fn test_capability_probe_defaults_to_none() {
        let handler = DefaultHandler;
        assert!(handler.download().is_none());
        assert!(handler.stream().is_none());
    }
}
