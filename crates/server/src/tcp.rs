//! TCP listeners and the per-connection ingest loop.
//!
//! Each accepted connection becomes one session keyed by its remote endpoint.
//! The ingest loop owns the read half: it normalizes what it reads, appends
//! it to the session history and fans it out to the session's viewers.

use std::sync::Arc;

use seeshell_protocol::SessionKey;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::broadcast::broadcast;
use crate::buffer::{LineNormalizer, CHUNK_SIZE};
use crate::config::SharedSettings;
use crate::session::{PeerWriter, Session};
use crate::state::Relay;

/// Accept connections forever. Transparent listeners skip the banner.
pub async fn accept_loop(
    listener: TcpListener,
    relay: Arc<Relay>,
    settings: SharedSettings,
    transparent: bool,
) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(
                    component = "tcp",
                    event = "tcp.accept_failed",
                    transparent,
                    error = %e,
                    "Failed to accept TCP connection"
                );
                continue;
            }
        };

        let banner = (!transparent).then(|| settings.load().public_endpoint());
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            let banner = banner.and_then(|endpoint| {
                stream
                    .peer_addr()
                    .ok()
                    .map(|addr| endpoint.banner(&SessionKey::from(addr)))
            });
            handle_connection(stream, relay, banner).await;
        });
    }
}

/// Own one accepted TCP connection end-to-end.
pub async fn handle_connection(stream: TcpStream, relay: Arc<Relay>, banner: Option<String>) {
    let key = match stream.peer_addr() {
        Ok(addr) => SessionKey::from(addr),
        Err(e) => {
            warn!(
                component = "tcp",
                event = "tcp.peer_addr_failed",
                error = %e,
                "Dropping connection without a peer address"
            );
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(component = "tcp", session_key = %key, error = %e, "Failed to set TCP_NODELAY");
    }

    let (reader, writer) = stream.into_split();
    let session = open_session(&relay, key, Box::new(writer));
    run_session(reader, session, relay, banner).await;
}

/// Create and register a session with an empty history.
pub fn open_session(relay: &Relay, key: SessionKey, writer: PeerWriter) -> Arc<Session> {
    let session = Arc::new(Session::new(key, writer));
    if relay.register_session(Arc::clone(&session)).is_some() {
        warn!(
            component = "tcp",
            event = "tcp.session.key_reused",
            session_key = %session.key(),
            "Replaced a session registered under the same key"
        );
    }
    info!(
        component = "tcp",
        event = "tcp.session.opened",
        session_key = %session.key(),
        "TCP session opened"
    );
    session
}

/// Write the banner, ingest until EOF or a read error, then tear down.
pub async fn run_session<R>(reader: R, session: Arc<Session>, relay: Arc<Relay>, banner: Option<String>)
where
    R: AsyncRead + Unpin,
{
    if let Some(banner) = banner {
        if let Err(e) = session.write_to_peer(banner.as_bytes()).await {
            warn!(
                component = "tcp",
                event = "tcp.banner_failed",
                session_key = %session.key(),
                error = %e,
                "Failed to write banner"
            );
        }
    }

    ingest(reader, &session, &relay).await;

    relay.unregister_session(&session);
    if let Err(e) = session.close().await {
        debug!(
            component = "tcp",
            session_key = %session.key(),
            error = %e,
            "Error closing TCP connection"
        );
    }
    info!(
        component = "tcp",
        event = "tcp.session.closed",
        session_key = %session.key(),
        buffered_bytes = session.buffered_bytes(),
        "TCP session closed"
    );
}

async fn ingest<R>(mut reader: R, session: &Session, relay: &Relay)
where
    R: AsyncRead + Unpin,
{
    let mut normalizer = LineNormalizer::new();
    let mut buf = [0u8; CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(
                    component = "tcp",
                    event = "tcp.read.eof",
                    session_key = %session.key(),
                    "TCP peer closed the connection"
                );
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(
                    component = "tcp",
                    event = "tcp.read.failed",
                    session_key = %session.key(),
                    error = %e,
                    "TCP read failed"
                );
                break;
            }
        };

        let chunk = normalizer.normalize(&buf[..n]);
        let history = session.append(&chunk).await;
        broadcast(relay, session.key(), &chunk);
        drop(history);
    }
}
