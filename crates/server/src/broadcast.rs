//! Fan-out of TCP chunks to attached viewers.

use bytes::Bytes;
use seeshell_protocol::SessionKey;
use tracing::warn;

use crate::state::Relay;
use crate::viewer::DeliveryError;

/// Deliver `chunk` to every initialized viewer under `key`.
///
/// Never waits on a viewer: the caller holds the session history lock. A
/// viewer whose queue is full is detached and evicted. A closed viewer is
/// skipped and stays registered until its own receive loop ends. Returns the
/// number of viewers the chunk was queued for.
pub fn broadcast(relay: &Relay, key: &SessionKey, chunk: &Bytes) -> usize {
    let mut delivered = 0;
    for viewer in relay.viewers_for(key) {
        if !viewer.is_initialized() {
            continue;
        }
        match viewer.try_send(chunk.clone()) {
            Ok(()) => delivered += 1,
            Err(e @ DeliveryError::Lagging(_)) => {
                warn!(
                    component = "broadcast",
                    event = "broadcast.viewer_evicted",
                    session_key = %key,
                    viewer_id = viewer.id(),
                    error = %e,
                    "Evicting viewer that stopped draining"
                );
                relay.detach_viewer(key, viewer.id());
                viewer.evict();
            }
            Err(e @ DeliveryError::Closed(_)) => {
                warn!(
                    component = "broadcast",
                    event = "broadcast.write_failed",
                    session_key = %key,
                    viewer_id = viewer.id(),
                    error = %e,
                    "Failed to deliver chunk to viewer"
                );
            }
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewer::{OutboundMessage, Viewer};
    use seeshell_protocol::ViewMode;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn attach(relay: &Relay, key: &str) -> (Arc<Viewer>, mpsc::Receiver<OutboundMessage>) {
        attach_with_capacity(relay, key, 8)
    }

    fn attach_with_capacity(
        relay: &Relay,
        key: &str,
        capacity: usize,
    ) -> (Arc<Viewer>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        let viewer = Arc::new(Viewer::new(SessionKey::new(key), ViewMode::Observe, tx));
        relay.attach_viewer(Arc::clone(&viewer));
        (viewer, rx)
    }

    #[tokio::test]
    async fn only_initialized_viewers_receive_chunks() {
        let relay = Relay::new();
        let key = SessionKey::new("k");
        let (ready, mut ready_rx) = attach(&relay, "k");
        let (_pending, mut pending_rx) = attach(&relay, "k");
        ready.mark_initialized();

        let chunk = Bytes::from_static(b"hello\r\n");
        assert_eq!(broadcast(&relay, &key, &chunk), 1);
        assert_eq!(ready_rx.recv().await, Some(OutboundMessage::Data(chunk)));
        assert!(pending_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_viewer_does_not_stop_the_others() {
        let relay = Relay::new();
        let key = SessionKey::new("k");
        let (broken, broken_rx) = attach(&relay, "k");
        let (healthy, mut healthy_rx) = attach(&relay, "k");
        broken.mark_initialized();
        healthy.mark_initialized();
        drop(broken_rx);

        let chunk = Bytes::from_static(b"x");
        assert_eq!(broadcast(&relay, &key, &chunk), 1);
        assert_eq!(healthy_rx.recv().await, Some(OutboundMessage::Data(chunk)));
        assert_eq!(relay.viewer_count(&key), 2);
    }

    #[tokio::test]
    async fn chunks_arrive_in_order() {
        let relay = Relay::new();
        let key = SessionKey::new("k");
        let (viewer, mut rx) = attach(&relay, "k");
        viewer.mark_initialized();

        for part in ["one", "two", "three"] {
            broadcast(&relay, &key, &Bytes::from(part));
        }
        for part in ["one", "two", "three"] {
            assert_eq!(rx.recv().await, Some(OutboundMessage::Data(Bytes::from(part))));
        }
    }

    #[tokio::test]
    async fn unknown_key_delivers_nowhere() {
        let relay = Relay::new();
        assert_eq!(
            broadcast(&relay, &SessionKey::new("nobody"), &Bytes::from_static(b"x")),
            0
        );
    }

    #[tokio::test]
    async fn full_viewer_is_evicted_without_blocking_the_others() {
        let relay = Relay::new();
        let key = SessionKey::new("k");
        let (stuck, _stuck_rx) = attach_with_capacity(&relay, "k", 2);
        let (healthy, mut healthy_rx) = attach_with_capacity(&relay, "k", 64);
        stuck.mark_initialized();
        healthy.mark_initialized();

        for i in 0..10 {
            broadcast(&relay, &key, &Bytes::from(format!("{i}")));
        }

        assert!(stuck.is_evicted());
        assert!(!healthy.is_evicted());
        let ids: Vec<_> = relay.viewers_for(&key).iter().map(|v| v.id()).collect();
        assert_eq!(ids, vec![healthy.id()]);
        for i in 0..10 {
            assert_eq!(
                healthy_rx.recv().await,
                Some(OutboundMessage::Data(Bytes::from(format!("{i}"))))
            );
        }
    }
}
