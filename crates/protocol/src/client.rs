//! Client → Server addressing
//!
//! Viewers select a session through the `{id}` path segment of
//! `/socket/{id}/ws`. The segment is the bare session key, optionally carrying
//! the interactive marker anywhere inside it (`203.0.113.5:54321show`).

use crate::types::{SessionKey, ViewMode};

/// Substring that switches a viewer into interactive mode
pub const INTERACTIVE_MARKER: &str = "show";

/// Session key and mode recovered from a viewer's request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerRoute {
    pub key: SessionKey,
    pub mode: ViewMode,
}

impl ViewerRoute {
    pub fn new(key: SessionKey, mode: ViewMode) -> Self {
        Self { key, mode }
    }

    /// Parse a path segment. Every occurrence of the marker is stripped to
    /// recover the bare key.
    pub fn parse(segment: &str) -> Self {
        if segment.contains(INTERACTIVE_MARKER) {
            Self {
                key: SessionKey::new(segment.replace(INTERACTIVE_MARKER, "")),
                mode: ViewMode::Interactive,
            }
        } else {
            Self {
                key: SessionKey::new(segment),
                mode: ViewMode::Observe,
            }
        }
    }

    /// Path segment that parses back into this route.
    pub fn to_segment(&self) -> String {
        match self.mode {
            ViewMode::Observe => self.key.to_string(),
            ViewMode::Interactive => format!("{}{}", self.key, INTERACTIVE_MARKER),
        }
    }
}
