//! One WebSocket viewer as seen by the registries and the fan-out.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use seeshell_protocol::{SessionKey, ViewMode, ViewerId, ViewerSummary};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

static NEXT_VIEWER_ID: AtomicU64 = AtomicU64::new(1);

/// Outbound queue depth per viewer
pub const OUTBOUND_CAPACITY: usize = 256;

/// Frames queued for a viewer's socket writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Terminal bytes (replay, broadcast or echo)
    Data(Bytes),
    /// Reply to a client ping
    Pong(Bytes),
}

#[derive(Debug, Error)]
#[error("viewer {0} is no longer accepting messages")]
pub struct ViewerClosed(pub ViewerId);

/// Why a non-blocking delivery did not land
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("viewer {0} is no longer accepting messages")]
    Closed(ViewerId),
    #[error("viewer {0} outbound queue is full")]
    Lagging(ViewerId),
}

pub struct Viewer {
    id: ViewerId,
    key: SessionKey,
    mode: ViewMode,
    initialized: AtomicBool,
    evicted: AtomicBool,
    evict_signal: Notify,
    outbound_tx: mpsc::Sender<OutboundMessage>,
}

impl Viewer {
    pub fn new(key: SessionKey, mode: ViewMode, outbound_tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            id: NEXT_VIEWER_ID.fetch_add(1, Ordering::Relaxed),
            key,
            mode,
            initialized: AtomicBool::new(false),
            evicted: AtomicBool::new(false),
            evict_signal: Notify::new(),
            outbound_tx,
        }
    }

    pub fn id(&self) -> ViewerId {
        self.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    /// True once the replay has been queued; gates live broadcast.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    /// Queue terminal bytes without waiting for room. Used wherever the
    /// session history lock is held.
    pub fn try_send(&self, data: Bytes) -> Result<(), DeliveryError> {
        self.outbound_tx
            .try_send(OutboundMessage::Data(data))
            .map_err(|e| match e {
                TrySendError::Full(_) => DeliveryError::Lagging(self.id),
                TrySendError::Closed(_) => DeliveryError::Closed(self.id),
            })
    }

    /// Flag the viewer for teardown; its bridge stops reading and disconnects.
    pub fn evict(&self) {
        self.evicted.store(true, Ordering::Release);
        self.evict_signal.notify_one();
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    /// Resolves once `evict` has been called.
    pub async fn evicted(&self) {
        if self.is_evicted() {
            return;
        }
        self.evict_signal.notified().await;
    }

    /// Queue a pong, waiting for room.
    pub async fn pong(&self, payload: Bytes) -> Result<(), ViewerClosed> {
        self.outbound_tx
            .send(OutboundMessage::Pong(payload))
            .await
            .map_err(|_| ViewerClosed(self.id))
    }

    pub fn summary(&self, dangling: bool) -> ViewerSummary {
        ViewerSummary {
            id: self.id,
            key: self.key.clone(),
            mode: self.mode,
            initialized: self.is_initialized(),
            dangling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_are_unique_and_viewers_start_uninitialized() {
        let (tx, _rx) = mpsc::channel(4);
        let a = Viewer::new(SessionKey::new("k"), ViewMode::Observe, tx.clone());
        let b = Viewer::new(SessionKey::new("k"), ViewMode::Interactive, tx);
        assert_ne!(a.id(), b.id());
        assert!(!a.is_initialized());
        a.mark_initialized();
        assert!(a.is_initialized());
        assert!(b.mode().is_interactive());
    }

    #[tokio::test]
    async fn send_fails_once_writer_is_gone() {
        let (tx, rx) = mpsc::channel(4);
        let viewer = Viewer::new(SessionKey::new("k"), ViewMode::Observe, tx);
        drop(rx);
        let err = viewer.pong(Bytes::from_static(b"x")).await.unwrap_err();
        assert_eq!(err.0, viewer.id());
        assert_eq!(
            viewer.try_send(Bytes::from_static(b"x")),
            Err(DeliveryError::Closed(viewer.id()))
        );
    }

    #[tokio::test]
    async fn try_send_reports_a_full_queue_instead_of_waiting() {
        let (tx, mut rx) = mpsc::channel(1);
        let viewer = Viewer::new(SessionKey::new("k"), ViewMode::Observe, tx);
        assert_eq!(viewer.try_send(Bytes::from_static(b"a")), Ok(()));
        assert_eq!(
            viewer.try_send(Bytes::from_static(b"b")),
            Err(DeliveryError::Lagging(viewer.id()))
        );
        assert_eq!(rx.recv().await, Some(OutboundMessage::Data(Bytes::from_static(b"a"))));
    }

    #[tokio::test]
    async fn eviction_wakes_a_waiting_bridge() {
        let (tx, _rx) = mpsc::channel(1);
        let viewer = std::sync::Arc::new(Viewer::new(SessionKey::new("k"), ViewMode::Observe, tx));
        let waiter = {
            let viewer = std::sync::Arc::clone(&viewer);
            tokio::spawn(async move { viewer.evicted().await })
        };
        assert!(!viewer.is_evicted());
        viewer.evict();
        tokio::time::timeout(std::time::Duration::from_secs(2), waiter)
            .await
            .expect("eviction was not observed")
            .unwrap();
        assert!(viewer.is_evicted());
        viewer.evicted().await;
    }
}
