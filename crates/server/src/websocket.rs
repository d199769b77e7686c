//! WebSocket bridge: one task per viewer connection.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{SinkExt, Stream, StreamExt};
use seeshell_protocol::ViewerRoute;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::session::Session;
use crate::state::AppState;
use crate::viewer::{DeliveryError, OutboundMessage, Viewer, OUTBOUND_CAPACITY};

/// WebSocket upgrade handler for `/socket/{id}/ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let route = ViewerRoute::parse(&id);
    ws.on_failed_upgrade(|e| {
        warn!(
            component = "websocket",
            event = "ws.upgrade_failed",
            error = %e,
            "WebSocket upgrade failed"
        );
    })
    .on_upgrade(move |socket| handle_socket(socket, route, state))
}

/// Handle an upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, route: ViewerRoute, state: AppState) {
    let (mut ws_tx, ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_CAPACITY);

    let session_key = route.key.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let frame = match msg {
                OutboundMessage::Data(data) => Message::Binary(data),
                OutboundMessage::Pong(data) => Message::Pong(data),
            };
            if let Err(e) = ws_tx.send(frame).await {
                debug!(
                    component = "websocket",
                    event = "ws.send.disconnected",
                    session_key = %session_key,
                    error = %e,
                    "WebSocket send failed, viewer disconnected"
                );
                break;
            }
        }
    });

    run_viewer(ws_rx, route, &state, outbound_tx).await;
    send_task.abort();
}

/// Input surfaced by the receive loop
enum Inbound {
    Data(Bytes),
    Ping(Bytes),
}

/// Next terminal input from the viewer, or `None` once the connection ends.
async fn next_inbound<S, E>(inbound: &mut S, viewer: &Viewer) -> Option<Inbound>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    loop {
        match inbound.next().await? {
            Ok(Message::Binary(data)) => return Some(Inbound::Data(data)),
            Ok(Message::Text(text)) => {
                return Some(Inbound::Data(Bytes::copy_from_slice(text.as_str().as_bytes())))
            }
            Ok(Message::Ping(data)) => return Some(Inbound::Ping(data)),
            Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                debug!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    viewer_id = viewer.id(),
                    "Viewer sent close frame"
                );
                return None;
            }
            Err(e) => {
                debug!(
                    component = "websocket",
                    event = "ws.connection.error",
                    viewer_id = viewer.id(),
                    error = %e,
                    "WebSocket read failed"
                );
                return None;
            }
        }
    }
}

/// Attach a viewer, replay history, then relay its input until it leaves.
pub(crate) async fn run_viewer<S, E>(
    mut inbound: S,
    route: ViewerRoute,
    state: &AppState,
    outbound_tx: mpsc::Sender<OutboundMessage>,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let viewer = Arc::new(Viewer::new(route.key.clone(), route.mode, outbound_tx));
    state.relay.attach_viewer(Arc::clone(&viewer));
    info!(
        component = "websocket",
        event = "ws.viewer.attached",
        session_key = %route.key,
        viewer_id = viewer.id(),
        mode = ?route.mode,
        "Viewer attached"
    );

    match state.relay.lookup_session(&route.key) {
        Some(session) => {
            replay(&session, &viewer).await;
            relay_input(&mut inbound, &session, &viewer, state).await;
        }
        None => {
            info!(
                component = "websocket",
                event = "ws.viewer.dangling",
                session_key = %route.key,
                viewer_id = viewer.id(),
                "No session for key, viewer will receive nothing"
            );
            while let Some(input) = next_inbound(&mut inbound, &viewer).await {
                if let Inbound::Ping(payload) = input {
                    pong(&viewer, payload).await;
                }
            }
        }
    }

    state.relay.detach_viewer(&route.key, viewer.id());
    info!(
        component = "websocket",
        event = "ws.viewer.detached",
        session_key = %route.key,
        viewer_id = viewer.id(),
        "Viewer detached"
    );
}

/// Queue the full history as one message and open the viewer to broadcasts.
///
/// The queue is fresh here, so `try_send` only fails if the socket is gone.
async fn replay(session: &Session, viewer: &Viewer) {
    let history = session.lock_history().await;
    if let Err(e) = viewer.try_send(history.snapshot()) {
        warn!(
            component = "websocket",
            event = "ws.replay_failed",
            session_key = %session.key(),
            viewer_id = viewer.id(),
            error = %e,
            "Failed to send replay"
        );
    }
    viewer.mark_initialized();
    drop(history);
}

async fn pong(viewer: &Viewer, payload: Bytes) {
    if let Err(e) = viewer.pong(payload).await {
        warn!(
            component = "websocket",
            event = "ws.pong_failed",
            viewer_id = viewer.id(),
            error = %e,
            "Failed to queue pong"
        );
    }
}

async fn relay_input<S, E>(inbound: &mut S, session: &Session, viewer: &Viewer, state: &AppState)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    loop {
        let input = tokio::select! {
            input = next_inbound(inbound, viewer) => input,
            () = viewer.evicted() => {
                info!(
                    component = "websocket",
                    event = "ws.viewer.evicted",
                    session_key = %session.key(),
                    viewer_id = viewer.id(),
                    "Viewer fell behind and was disconnected"
                );
                None
            }
        };
        let data = match input {
            Some(Inbound::Data(data)) => data,
            Some(Inbound::Ping(payload)) => {
                pong(viewer, payload).await;
                continue;
            }
            None => break,
        };

        let interactive = viewer.mode().is_interactive();
        if interactive {
            if let Err(e) = viewer.try_send(data.clone()) {
                warn!(
                    component = "websocket",
                    event = "ws.echo_failed",
                    viewer_id = viewer.id(),
                    error = %e,
                    "Failed to echo input"
                );
                if matches!(e, DeliveryError::Lagging(_)) {
                    viewer.evict();
                }
            }
        }

        let forward = interactive || state.settings.load().forward_observer_input;
        if forward {
            if let Err(e) = session.write_to_peer(&data).await {
                warn!(
                    component = "websocket",
                    event = "ws.forward_failed",
                    session_key = %session.key(),
                    viewer_id = viewer.id(),
                    error = %e,
                    "Failed to forward input to TCP peer"
                );
            }
        }
    }
}
