//! seeshell protocol
//!
//! Types shared between the relay server and its clients: session keys,
//! viewer routes, banner formatting and the introspection snapshot that the
//! admin endpoint serves as JSON.

pub mod client;
pub mod server;
pub mod types;

pub use client::{ViewerRoute, INTERACTIVE_MARKER};
pub use server::{RelaySnapshot, SessionSummary, ViewerSummary};
pub use types::*;
