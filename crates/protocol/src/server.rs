//! Server → Client introspection payloads

use serde::{Deserialize, Serialize};

use crate::types::{SessionKey, ViewMode, ViewerId};

/// One live TCP source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub key: SessionKey,
    /// Unix seconds
    pub connected_at: u64,
    pub buffered_bytes: usize,
    pub viewers: usize,
}

/// One attached (or dangling) WebSocket viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerSummary {
    pub id: ViewerId,
    pub key: SessionKey,
    pub mode: ViewMode,
    pub initialized: bool,
    /// No session is registered under the viewer's key
    pub dangling: bool,
}

/// Point-in-time view of both registries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySnapshot {
    pub sessions: Vec<SessionSummary>,
    pub viewers: Vec<ViewerSummary>,
}

impl RelaySnapshot {
    pub fn session_keys(&self) -> impl Iterator<Item = &SessionKey> {
        self.sessions.iter().map(|s| &s.key)
    }
}
