//! Media Image Handler
//!
//! Images are nodes whose binary content lives on disk under a configured
//! root, addressed by the node uuid. The handler implements both optional
//! stream capabilities and drives a background-fetch state machine through
//! the notification bus:
//!
//! 1. a node is saved with a `source_url` and status INIT; the pre-hook arms
//!    the machine by moving it to UPDATE
//! 2. the post-hook publishes the node uuid on `media_file_download`
//! 3. [`ImageDownloadListener`] receives the uuid, fetches the remote body
//!    through the injected [`MediaFetcher`], stores it via the stream
//!    capability, and saves the node at DONE (or ERROR with the message)
//!
//! Listeners save through the manager like any other caller, so every fetch
//! outcome is itself audited and revisioned.

use crate::handlers::{DownloadData, DownloadHandler, NodeHandler, StreamHandler};
use crate::models::{
    Node, Reference, PROCESS_STATUS_DONE, PROCESS_STATUS_ERROR, PROCESS_STATUS_INIT,
    PROCESS_STATUS_UPDATE,
};
use crate::services::{
    ListenerAction, ListenerError, NodeManager, NodeManagerError, Notification,
    NotificationListener,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// Channel carrying "fetch this node's remote content" work requests
pub const MEDIA_DOWNLOAD_CHANNEL: &str = "media_file_download";

/// Business payload of an image node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageData {
    pub name: String,
    pub reference: String,
    /// Remote origin; non-empty arms the background fetch
    pub source_url: String,
}

/// Operational payload of an image node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageMeta {
    pub width: i64,
    pub height: i64,
    pub size: i64,
    pub content_type: String,
    pub hash: String,
    /// Fetch state machine: INIT, UPDATE, DONE or ERROR
    pub source_status: i64,
    pub source_error: String,
}

impl Default for ImageMeta {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            size: 0,
            content_type: String::new(),
            hash: String::new(),
            source_status: PROCESS_STATUS_INIT,
            source_error: String::new(),
        }
    }
}

/// Sniff a MIME type from the first bytes of a stream
pub fn detect_content_type(head: &[u8]) -> &'static str {
    if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if head.starts_with(b"\xff\xd8\xff") {
        "image/jpeg"
    } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        "image/gif"
    } else {
        "application/octet-stream"
    }
}

/// Handler for `media.image` nodes
pub struct ImageHandler {
    root: PathBuf,
}

impl ImageHandler {
    /// Create the handler with the storage root for binary content
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// On-disk location of a node's binary, fanned out by uuid prefix
    pub fn file_location(&self, node: &Node) -> PathBuf {
        let clean = node.uuid.to_clean();
        self.root
            .join(&clean[0..2])
            .join(&clean[2..4])
            .join(format!("{clean}.bin"))
    }

    fn meta(&self, node: &Node) -> Result<ImageMeta, NodeManagerError> {
        serde_json::from_value(node.meta.clone())
            .map_err(|e| NodeManagerError::corrupted(node.uuid, format!("image meta: {e}")))
    }

    fn data(&self, node: &Node) -> Result<ImageData, NodeManagerError> {
        serde_json::from_value(node.data.clone())
            .map_err(|e| NodeManagerError::corrupted(node.uuid, format!("image data: {e}")))
    }

    /// Move INIT to UPDATE when a remote source is present
    fn arm_fetch(&self, node: &mut Node) -> Result<(), NodeManagerError> {
        let data = self.data(node)?;
        let mut meta = self.meta(node)?;

        if !data.source_url.is_empty() && meta.source_status == PROCESS_STATUS_INIT {
            meta.source_status = PROCESS_STATUS_UPDATE;
            meta.source_error.clear();
            node.meta = serde_json::to_value(meta)
                .map_err(|e| NodeManagerError::corrupted(node.uuid, format!("image meta: {e}")))?;
        }

        Ok(())
    }

    /// Publish the fetch work request when the machine is armed
    fn request_fetch(&self, node: &Node, manager: &NodeManager) -> Result<(), NodeManagerError> {
        if self.meta(node)?.source_status == PROCESS_STATUS_UPDATE {
            manager.notify(MEDIA_DOWNLOAD_CHANNEL, &node.uuid.to_hyphenated());
        }
        Ok(())
    }
}

#[async_trait]
impl NodeHandler for ImageHandler {
    fn default_payload(&self) -> (Value, Value) {
        (
            serde_json::to_value(ImageData::default()).expect("image data serializes"),
            serde_json::to_value(ImageMeta::default()).expect("image meta serializes"),
        )
    }

    async fn pre_insert(
        &self,
        node: &mut Node,
        _manager: &NodeManager,
    ) -> Result<(), NodeManagerError> {
        self.arm_fetch(node)
    }

    async fn pre_update(
        &self,
        node: &mut Node,
        _manager: &NodeManager,
    ) -> Result<(), NodeManagerError> {
        self.arm_fetch(node)
    }

    async fn post_insert(
        &self,
        node: &mut Node,
        manager: &NodeManager,
    ) -> Result<(), NodeManagerError> {
        self.request_fetch(node, manager)
    }

    async fn post_update(
        &self,
        node: &mut Node,
        manager: &NodeManager,
    ) -> Result<(), NodeManagerError> {
        self.request_fetch(node, manager)
    }

    fn download(&self) -> Option<&dyn DownloadHandler> {
        Some(self)
    }

    fn stream(&self) -> Option<&dyn StreamHandler> {
        Some(self)
    }
}

#[async_trait]
impl DownloadHandler for ImageHandler {
    fn download_data(&self, node: &Node) -> DownloadData {
        let content_type = self
            .meta(node)
            .map(|meta| meta.content_type)
            .unwrap_or_default();

        DownloadData {
            filename: node.name.clone(),
            content_type,
        }
    }

    async fn copy_to(
        &self,
        node: &Node,
        dest: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, NodeManagerError> {
        let path = self.file_location(node);
        let mut file = tokio::fs::File::open(&path).await.map_err(|e| {
            NodeManagerError::stream_storage(format!("failed to open {}: {e}", path.display()))
        })?;

        tokio::io::copy(&mut file, dest)
            .await
            .map_err(|e| NodeManagerError::stream_storage(format!("failed to stream out: {e}")))
    }
}

#[async_trait]
impl StreamHandler for ImageHandler {
    async fn store_stream(
        &self,
        node: &mut Node,
        src: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64, NodeManagerError> {
        let path = self.file_location(node);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                NodeManagerError::stream_storage(format!(
                    "failed to create {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let mut file = tokio::fs::File::create(&path).await.map_err(|e| {
            NodeManagerError::stream_storage(format!("failed to create {}: {e}", path.display()))
        })?;

        let written = tokio::io::copy(src, &mut file)
            .await
            .map_err(|e| NodeManagerError::stream_storage(format!("failed to store: {e}")))?;

        // Re-read the head for content sniffing, as written on disk.
        let mut head = vec![0u8; 512];
        let mut file = tokio::fs::File::open(&path).await.map_err(|e| {
            NodeManagerError::stream_storage(format!("failed to reopen {}: {e}", path.display()))
        })?;
        let read = file
            .read(&mut head)
            .await
            .map_err(|e| NodeManagerError::stream_storage(format!("failed to sniff: {e}")))?;

        let mut meta = self.meta(node)?;
        meta.size = written as i64;
        meta.content_type = detect_content_type(&head[..read]).to_string();
        node.meta = serde_json::to_value(meta)
            .map_err(|e| NodeManagerError::corrupted(node.uuid, format!("image meta: {e}")))?;

        Ok(written)
    }
}

/// Failure reported by a [`MediaFetcher`]
#[derive(Debug, Error)]
#[error("fetch failed: {message}")]
pub struct FetchError {
    pub message: String,
}

/// Seam for retrieving remote media content
///
/// Injected into the download listener so the transport is swappable (and
/// stubbed in tests); the core carries no HTTP client of its own.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Retrieve the body at `url`
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Listener draining `media_file_download` work requests
///
/// Every outcome is written back through the manager: success ends at DONE
/// with size and sniffed content type, a failed fetch ends at ERROR with the
/// message recorded. The listener always keeps the subscription alive.
pub struct ImageDownloadListener {
    fetcher: Arc<dyn MediaFetcher>,
}

impl ImageDownloadListener {
    /// Create the listener with its fetch transport
    pub fn new(fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl NotificationListener for ImageDownloadListener {
    async fn handle(
        &self,
        notification: &Notification,
        manager: &NodeManager,
    ) -> Result<ListenerAction, ListenerError> {
        let reference = Reference::parse(&notification.payload)?;

        let Some(mut node) = manager.find(reference).await? else {
            tracing::warn!(%reference, "download requested for unknown node");
            return Ok(ListenerAction::Continue);
        };

        let handler = manager.handlers().get(&node)?.clone();
        let mut meta: ImageMeta = serde_json::from_value(node.meta.clone())
            .map_err(|e| NodeManagerError::corrupted(node.uuid, format!("image meta: {e}")))?;

        if meta.source_status == PROCESS_STATUS_DONE {
            tracing::debug!(%reference, "nothing to update");
            return Ok(ListenerAction::Continue);
        }

        let data: ImageData = serde_json::from_value(node.data.clone())
            .map_err(|e| NodeManagerError::corrupted(node.uuid, format!("image data: {e}")))?;

        let body = match self.fetcher.fetch(&data.source_url).await {
            Ok(body) => body,
            Err(e) => {
                meta.source_status = PROCESS_STATUS_ERROR;
                meta.source_error = "unable to retrieve the remote file".to_string();
                node.meta = serde_json::to_value(meta).map_err(|err| {
                    NodeManagerError::corrupted(node.uuid, format!("image meta: {err}"))
                })?;
                manager.save(node).await?;
                return Err(e.into());
            }
        };

        let stream = handler
            .stream()
            .ok_or_else(|| NodeManagerError::NoStreamHandler {
                node_type: node.node_type.clone(),
            })?;

        let mut src: &[u8] = &body;
        stream.store_stream(&mut node, &mut src).await?;

        let mut meta: ImageMeta = serde_json::from_value(node.meta.clone())
            .map_err(|e| NodeManagerError::corrupted(node.uuid, format!("image meta: {e}")))?;
        meta.source_status = PROCESS_STATUS_DONE;
        node.meta = serde_json::to_value(meta)
            .map_err(|e| NodeManagerError::corrupted(node.uuid, format!("image meta: {e}")))?;

        manager.save(node).await?;

        Ok(ListenerAction::Continue)
    }
}
