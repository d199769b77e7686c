//! Core types shared across the protocol

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Identifier of one live TCP source.
///
/// The key is the literal remote endpoint string (`ip:port`) of the TCP
/// connection, so two concurrently open connections never share one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for SessionKey {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Process-unique viewer identifier
pub type ViewerId = u64;

/// How a viewer participates in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    /// Watch only, no local echo
    #[default]
    Observe,
    /// Keystrokes are echoed back to the viewer and forwarded to the TCP peer
    Interactive,
}

impl ViewMode {
    pub fn is_interactive(self) -> bool {
        matches!(self, ViewMode::Interactive)
    }
}

/// Where viewers are told to point their browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicEndpoint {
    pub https: bool,
    pub domain: String,
    pub port: u16,
}

impl PublicEndpoint {
    pub fn scheme(&self) -> &'static str {
        if self.https {
            "https"
        } else {
            "http"
        }
    }

    /// Browser URL of the viewer page for `key`
    pub fn viewer_url(&self, key: &SessionKey) -> String {
        format!(
            "{}://{}:{}/socket/{}",
            self.scheme(),
            self.domain,
            self.port,
            key
        )
    }

    /// Line written to a freshly accepted, non-transparent TCP peer.
    pub fn banner(&self, key: &SessionKey) -> String {
        format!("Terminal output redirected to {}\r\n", self.viewer_url(key))
    }
}
