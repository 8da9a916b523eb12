//! Notification Bus
//!
//! Decouples writers from reactive listeners: the manager publishes small
//! text payloads on named channels, and a single cooperative receive loop
//! hands each payload to every listener registered on its channel. Listeners
//! may call back into the manager (including `save`), so a commit can fan
//! out into follow-up writes without the writer knowing.
//!
//! # Delivery model
//!
//! - at-least-once; FIFO per channel (one shared queue preserves publish
//!   order), no ordering across channels
//! - listeners on one channel run sequentially, in registration order
//! - a listener error is logged and never blocks the next listener or the
//!   next payload
//! - payloads published on channels with no listener are dropped, the way
//!   unsubscribed channels drop notifications in a LISTEN/NOTIFY backend
//!
//! The receive loop must run on its own task; `stop()` is safe from any
//! thread and wakes the loop through a one-slot shutdown channel.

use crate::services::NodeManager;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;

/// Payload delivered to channel listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Channel the payload was published on
    pub channel: String,
    /// Publisher-supplied text payload
    pub payload: String,
}

/// What a listener wants the receive loop to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerAction {
    /// Keep the subscription alive and proceed to the next payload
    Continue,
    /// Terminate the receive loop
    Stop,
}

/// Error type listeners may surface; logged by the loop, never fatal to it
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback registered on a named channel
#[async_trait]
pub trait NotificationListener: Send + Sync {
    /// React to one delivered payload
    ///
    /// The manager reference allows listeners to read and save nodes; a
    /// returned error is surfaced to the loop's logs and delivery continues.
    async fn handle(
        &self,
        notification: &Notification,
        manager: &NodeManager,
    ) -> Result<ListenerAction, ListenerError>;
}

/// Bus lifecycle errors
#[derive(Error, Debug)]
pub enum NotificationError {
    /// `listen()` was called while the receive loop is running or after it
    /// finished
    #[error("the bus receive loop is already running or finished")]
    AlreadyListening,
}

struct Receivers {
    queue_rx: mpsc::UnboundedReceiver<Notification>,
    shutdown_rx: mpsc::Receiver<()>,
}

struct BusInner {
    queue_tx: mpsc::UnboundedSender<Notification>,
    shutdown_tx: mpsc::Sender<()>,
    receivers: Mutex<Option<Receivers>>,
    listeners: RwLock<HashMap<String, Vec<Arc<dyn NotificationListener>>>>,
}

/// Channel-based publish/subscribe primitive
///
/// Cheap to clone; all clones share one queue and one listener table.
#[derive(Clone)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl NotificationBus {
    /// Create a bus with an empty listener table
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Self {
            inner: Arc::new(BusInner {
                queue_tx,
                shutdown_tx,
                receivers: Mutex::new(Some(Receivers {
                    queue_rx,
                    shutdown_rx,
                })),
                listeners: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a listener on a named channel
    ///
    /// Multiple listeners may share a channel; they are invoked in
    /// registration order.
    pub fn register(&self, channel: impl Into<String>, listener: Arc<dyn NotificationListener>) {
        self.inner
            .listeners
            .write()
            .expect("listener table lock poisoned")
            .entry(channel.into())
            .or_default()
            .push(listener);
    }

    /// Enqueue a payload for delivery on a channel
    ///
    /// Non-blocking; delivery happens on the receive loop's task.
    pub fn publish(&self, channel: impl Into<String>, payload: impl Into<String>) {
        let notification = Notification {
            channel: channel.into(),
            payload: payload.into(),
        };

        if self.inner.queue_tx.send(notification).is_err() {
            tracing::warn!("bus receive loop has stopped, dropping payload");
        }
    }

    /// Run the receive loop until `stop()` or a `Stop` action
    ///
    /// Blocks its task waiting for payloads; spawn it on a dedicated task:
    ///
    /// ```ignore
    /// let bus_handle = bus.clone();
    /// tokio::spawn(async move { bus_handle.listen(manager).await });
    /// ```
    pub async fn listen(&self, manager: Arc<NodeManager>) -> Result<(), NotificationError> {
        let Some(mut receivers) = self
            .inner
            .receivers
            .lock()
            .expect("receiver lock poisoned")
            .take()
        else {
            return Err(NotificationError::AlreadyListening);
        };

        tracing::info!("notification bus listening");

        loop {
            tokio::select! {
                biased; // shutdown wins over queued payloads

                _ = receivers.shutdown_rx.recv() => {
                    tracing::info!("notification bus stopping");
                    return Ok(());
                }

                delivered = receivers.queue_rx.recv() => {
                    let Some(notification) = delivered else {
                        // Every publisher handle is gone.
                        return Ok(());
                    };

                    if self.dispatch(&notification, &manager).await == ListenerAction::Stop {
                        tracing::info!(channel = %notification.channel, "listener stopped the bus");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Hand one payload to every listener on its channel, in order
    async fn dispatch(&self, notification: &Notification, manager: &NodeManager) -> ListenerAction {
        let listeners = {
            let table = self
                .inner
                .listeners
                .read()
                .expect("listener table lock poisoned");
            table.get(&notification.channel).cloned().unwrap_or_default()
        };

        if listeners.is_empty() {
            tracing::debug!(channel = %notification.channel, "no listener, payload dropped");
            return ListenerAction::Continue;
        }

        for listener in listeners {
            match listener.handle(notification, manager).await {
                Ok(ListenerAction::Continue) => {}
                Ok(ListenerAction::Stop) => return ListenerAction::Stop,
                Err(e) => {
                    tracing::error!(
                        channel = %notification.channel,
                        "listener failed: {e}"
                    );
                }
            }
        }

        ListenerAction::Continue
    }

    /// Terminate the receive loop
    ///
    /// Safe to call from any thread, including before `listen()` starts (the
    /// shutdown slot holds the signal). Does not interrupt an in-flight
    /// listener call.
    pub fn stop(&self) {
        let _ = self.inner.shutdown_tx.try_send(());
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Quote a payload as a single-quoted text literal
///
/// LISTEN/NOTIFY backends splice payloads into the command text; doubling
/// single quotes is the escaping rule for that frame. The in-process queue
/// delivers payloads verbatim, so this is only used when rendering the
/// wire-format view of a publish (e.g. in logs).
pub fn quote_payload(payload: &str) -> String {
    format!("'{}'", payload.replace('\'', "''"))
}
