//! A live TCP source: its write half and its accumulated history.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use seeshell_protocol::{SessionKey, SessionSummary};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};

use crate::buffer::SessionBuffer;

/// Write side of the TCP peer, boxed so tests can substitute an in-memory pipe
pub type PeerWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct Session {
    key: SessionKey,
    connected_at: u64,
    /// Taken on close so the socket is released with the session, not with
    /// the last bridge still holding an `Arc<Session>`.
    peer: Mutex<Option<PeerWriter>>,
    /// Held by the ingest loop across append + fan-out and by a bridge across
    /// snapshot + replay, so each viewer sees every byte exactly once.
    history: Mutex<SessionBuffer>,
    buffered: AtomicUsize,
}

impl Session {
    pub fn new(key: SessionKey, peer: PeerWriter) -> Self {
        Self {
            key,
            connected_at: unix_now(),
            peer: Mutex::new(Some(peer)),
            history: Mutex::new(SessionBuffer::new()),
            buffered: AtomicUsize::new(0),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Bytes appended so far, readable without taking the history lock
    pub fn buffered_bytes(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    /// Append a normalized chunk. The returned guard must be held until the
    /// chunk has been fanned out.
    pub async fn append(&self, chunk: &[u8]) -> MutexGuard<'_, SessionBuffer> {
        let mut history = self.history.lock().await;
        history.append(chunk);
        self.buffered.store(history.len(), Ordering::Release);
        history
    }

    /// Lock the history for a replay snapshot.
    pub async fn lock_history(&self) -> MutexGuard<'_, SessionBuffer> {
        self.history.lock().await
    }

    /// Write raw bytes back to the TCP peer.
    pub async fn write_to_peer(&self, data: &[u8]) -> io::Result<()> {
        let mut peer = self.peer.lock().await;
        let peer = peer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "session closed"))?;
        peer.write_all(data).await?;
        peer.flush().await
    }

    /// Shut down and drop the write side of the TCP connection.
    pub async fn close(&self) -> io::Result<()> {
        let peer = self.peer.lock().await.take();
        match peer {
            Some(mut peer) => peer.shutdown().await,
            None => Ok(()),
        }
    }

    pub fn summary(&self, viewers: usize) -> SessionSummary {
        SessionSummary {
            key: self.key.clone(),
            connected_at: self.connected_at,
            buffered_bytes: self.buffered_bytes(),
            viewers,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
