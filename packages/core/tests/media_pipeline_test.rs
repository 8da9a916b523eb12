//! Media Download Pipeline Tests
//!
//! End-to-end exercise of the asynchronous fetch flow: saving an image node
//! with a remote source publishes a work request, the download listener
//! fetches through the injected transport, stores the stream, and saves the
//! node back - producing a new revision the caller can observe.

use anyhow::Result;
use async_trait::async_trait;
use noderepo_core::db::DatabaseService;
use noderepo_core::handlers::{
    FetchError, HandlerRegistry, ImageDownloadListener, ImageHandler, MediaFetcher,
    MEDIA_DOWNLOAD_CHANNEL,
};
use noderepo_core::models::{
    Node, Reference, PROCESS_STATUS_DONE, PROCESS_STATUS_ERROR, PROCESS_STATUS_INIT,
    PROCESS_STATUS_UPDATE,
};
use noderepo_core::services::{ManagerConfig, NodeManager, NotificationBus};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::time::{sleep, timeout, Duration};

const PNG_BODY: &[u8] = b"\x89PNG\r\n\x1a\nfake image bytes";

struct StubFetcher {
    body: Vec<u8>,
}

#[async_trait]
impl MediaFetcher for StubFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
        Ok(self.body.clone())
    }
}

struct FailingFetcher;

#[async_trait]
impl MediaFetcher for FailingFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        Err(FetchError {
            message: format!("connection refused: {url}"),
        })
    }
}

async fn create_media_manager(
    fetcher: Arc<dyn MediaFetcher>,
) -> Result<(Arc<NodeManager>, NotificationBus, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db = DatabaseService::new(temp_dir.path().join("test.db"), "main").await?;

    let mut registry = HandlerRegistry::new();
    registry.register(
        "media.image",
        Arc::new(ImageHandler::new(temp_dir.path().join("media"))),
    );

    let bus = NotificationBus::new();
    let manager = Arc::new(NodeManager::new(
        db,
        Arc::new(registry),
        bus.clone(),
        ManagerConfig::default(),
    ));

    bus.register(
        MEDIA_DOWNLOAD_CHANNEL,
        Arc::new(ImageDownloadListener::new(fetcher)),
    );

    let loop_bus = bus.clone();
    let loop_manager = manager.clone();
    tokio::spawn(async move { loop_bus.listen(loop_manager).await });

    Ok((manager, bus, temp_dir))
}

fn image_node(manager: &NodeManager, source_url: &str) -> Node {
    let mut node = manager.new_node("media.image").unwrap();
    node.name = "The image".to_string();
    node.slug = "the-image".to_string();
    node.data["source_url"] = serde_json::json!(source_url);
    node
}

/// Poll until the fetch state machine leaves UPDATE or the deadline passes
async fn wait_for_settled(manager: &NodeManager, uuid: Reference) -> Result<Node> {
    timeout(Duration::from_secs(5), async {
        loop {
            let node = manager.find(uuid).await.unwrap().unwrap();
            if node.meta["source_status"] != PROCESS_STATUS_UPDATE {
                return node;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .map_err(Into::into)
}

#[tokio::test]
async fn test_successful_fetch_ends_at_done_with_stored_stream() -> Result<()> {
    let (manager, bus, temp_dir) = create_media_manager(Arc::new(StubFetcher {
        body: PNG_BODY.to_vec(),
    }))
    .await?;

    let saved = manager
        .save(image_node(&manager, "http://example.com/pic.png"))
        .await?;

    // The pre-hook armed the machine before the insert was committed.
    assert_eq!(saved.meta["source_status"], PROCESS_STATUS_UPDATE);

    let settled = wait_for_settled(&manager, saved.uuid).await?;
    assert_eq!(settled.meta["source_status"], PROCESS_STATUS_DONE);
    assert_eq!(settled.meta["size"], PNG_BODY.len() as i64);
    assert_eq!(settled.meta["content_type"], "image/png");
    assert_eq!(settled.meta["source_error"], "");

    // The listener saved through the manager, so the fetch is revisioned.
    assert_eq!(settled.revision, 2);
    assert_eq!(manager.find_revisions(saved.uuid, 0, 10).await?.len(), 2);

    // The binary landed under the configured root.
    let handler = ImageHandler::new(temp_dir.path().join("media"));
    let stored = std::fs::read(handler.file_location(&settled))?;
    assert_eq!(stored, PNG_BODY);

    bus.stop();
    Ok(())
}

#[tokio::test]
async fn test_failed_fetch_records_the_error_and_loop_survives() -> Result<()> {
    let (manager, bus, _temp_dir) = create_media_manager(Arc::new(FailingFetcher)).await?;

    let saved = manager
        .save(image_node(&manager, "http://example.com/missing.png"))
        .await?;

    let settled = wait_for_settled(&manager, saved.uuid).await?;
    assert_eq!(settled.meta["source_status"], PROCESS_STATUS_ERROR);
    assert_eq!(
        settled.meta["source_error"],
        "unable to retrieve the remote file"
    );
    assert_eq!(settled.revision, 2);

    // The listener error did not kill the loop: a second node still gets
    // processed.
    let second = manager
        .save(image_node_with_slug(&manager, "http://example.com/other.png", "other"))
        .await?;
    let settled = wait_for_settled(&manager, second.uuid).await?;
    assert_eq!(settled.meta["source_status"], PROCESS_STATUS_ERROR);

    bus.stop();
    Ok(())
}

fn image_node_with_slug(manager: &NodeManager, source_url: &str, slug: &str) -> Node {
    let mut node = image_node(manager, source_url);
    node.slug = slug.to_string();
    node
}

#[tokio::test]
async fn test_download_request_for_streamless_type_is_refused() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db = DatabaseService::new(temp_dir.path().join("test.db"), "main").await?;

    // "media.image" resolves to a handler WITHOUT the stream capability.
    let mut registry = HandlerRegistry::new();
    registry.register("media.image", Arc::new(noderepo_core::handlers::DefaultHandler));

    let bus = NotificationBus::new();
    let manager = Arc::new(NodeManager::new(
        db,
        Arc::new(registry),
        bus.clone(),
        ManagerConfig::default(),
    ));

    bus.register(
        MEDIA_DOWNLOAD_CHANNEL,
        Arc::new(ImageDownloadListener::new(Arc::new(StubFetcher {
            body: PNG_BODY.to_vec(),
        }))),
    );

    let loop_bus = bus.clone();
    let loop_manager = manager.clone();
    tokio::spawn(async move { loop_bus.listen(loop_manager).await });

    let mut node = manager.new_node("media.image")?;
    node.name = "No stream".to_string();
    node.slug = "no-stream".to_string();
    let saved = manager.save(node).await?;

    // The listener hits NoStreamHandler, which is logged; the node is left
    // alone and the loop survives.
    manager.notify(MEDIA_DOWNLOAD_CHANNEL, &saved.uuid.to_hyphenated());
    sleep(Duration::from_millis(100)).await;

    let current = manager.find(saved.uuid).await?.unwrap();
    assert_eq!(current.revision, 1);

    manager.notify(MEDIA_DOWNLOAD_CHANNEL, &saved.uuid.to_hyphenated());
    sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.find(saved.uuid).await?.unwrap().revision, 1);

    bus.stop();
    Ok(())
}

#[tokio::test]
async fn test_node_without_source_url_is_never_fetched() -> Result<()> {
    let (manager, bus, _temp_dir) = create_media_manager(Arc::new(StubFetcher {
        body: PNG_BODY.to_vec(),
    }))
    .await?;

    let mut node = manager.new_node("media.image")?;
    node.name = "Local only".to_string();
    node.slug = "local-only".to_string();

    let saved = manager.save(node).await?;
    assert_eq!(saved.meta["source_status"], PROCESS_STATUS_INIT);

    // Give the loop a moment; the state must not move.
    sleep(Duration::from_millis(100)).await;
    let current = manager.find(saved.uuid).await?.unwrap();
    assert_eq!(current.meta["source_status"], PROCESS_STATUS_INIT);
    assert_eq!(current.revision, 1);

    bus.stop();
    Ok(())
}
