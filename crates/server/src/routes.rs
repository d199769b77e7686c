//! HTTP surface: viewer page, WebSocket endpoint, session listing.

use axum::{
    extract::State,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use seeshell_protocol::{RelaySnapshot, ViewerRoute};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::config::Settings;
use crate::state::AppState;
use crate::websocket::ws_handler;

const VIEWER_PAGE: &str = include_str!("../static/index.html");

pub fn router(state: AppState, settings: &Settings) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/socket/{id}", get(viewer_page))
        .route("/socket/{id}/ws", get(ws_handler))
        .nest_service("/static", ServeDir::new(&settings.static_dir));

    if let Some(secret) = settings.secret_segment() {
        router = router
            .route(&format!("/{secret}"), get(list_page))
            .route(&format!("/{secret}/json"), get(list_json));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}

async fn viewer_page() -> Html<&'static str> {
    Html(VIEWER_PAGE)
}

fn snapshot(state: &AppState) -> RelaySnapshot {
    let snapshot = state.relay.snapshot();
    debug!(
        component = "routes",
        event = "relay.snapshot",
        sessions = snapshot.sessions.len(),
        viewers = snapshot.viewers.len(),
        dangling = snapshot.viewers.iter().filter(|v| v.dangling).count(),
        "Relay introspection"
    );
    snapshot
}

async fn list_json(State(state): State<AppState>) -> Json<RelaySnapshot> {
    Json(snapshot(&state))
}

async fn list_page(State(state): State<AppState>) -> Html<String> {
    Html(render_list(&snapshot(&state)))
}

fn render_list(snapshot: &RelaySnapshot) -> String {
    let mut rows = String::new();
    for session in &snapshot.sessions {
        let key = escape_html(session.key.as_str());
        let interactive = escape_html(
            &ViewerRoute::new(session.key.clone(), seeshell_protocol::ViewMode::Interactive)
                .to_segment(),
        );
        rows.push_str(&format!(
            "<li><a href=\"/socket/{key}\">{key}</a> (<a href=\"/socket/{interactive}\">interactive</a>) \
             {} bytes, {} viewers</li>\n",
            session.buffered_bytes, session.viewers
        ));
    }
    if rows.is_empty() {
        rows.push_str("<li>No live sessions</li>\n");
    }

    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>seeshell sessions</title></head>\n\
         <body>\n<h1>Live sessions</h1>\n<ul>\n{rows}</ul>\n</body>\n</html>\n"
    )
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedSettings;
    use crate::state::Relay;
    use crate::tcp::accept_loop;
    use arc_swap::ArcSwap;
    use futures::{SinkExt, StreamExt};
    use seeshell_protocol::{SessionKey, SessionSummary};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

    #[test]
    fn listing_links_each_session_and_escapes_keys() {
        let snapshot = RelaySnapshot {
            sessions: vec![SessionSummary {
                key: SessionKey::new("<b>:1"),
                connected_at: 0,
                buffered_bytes: 12,
                viewers: 2,
            }],
            viewers: Vec::new(),
        };
        let html = render_list(&snapshot);
        assert!(html.contains("<a href=\"/socket/&lt;b&gt;:1\">&lt;b&gt;:1</a>"));
        assert!(html.contains("/socket/&lt;b&gt;:1show"));
        assert!(html.contains("12 bytes, 2 viewers"));

        assert!(render_list(&RelaySnapshot::default()).contains("No live sessions"));
    }

    /// Collect binary frames until `len` bytes have arrived.
    async fn read_binary<S>(ws: &mut S, len: usize) -> Vec<u8>
    where
        S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        let mut out = Vec::new();
        while out.len() < len {
            let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .expect("websocket error");
            if msg.is_binary() {
                out.extend_from_slice(&msg.into_data());
            }
        }
        out
    }

    #[tokio::test]
    async fn tcp_source_is_viewable_and_drivable_over_websocket() {
        let settings = Settings {
            secret_path: "admin".into(),
            ..Settings::default()
        };
        let shared: SharedSettings = Arc::new(ArcSwap::from_pointee(settings.clone()));
        let relay = Arc::new(Relay::new());
        let state = AppState::new(Arc::clone(&relay), Arc::clone(&shared));

        let http = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_addr = http.local_addr().unwrap();
        let app = router(state, &settings);
        tokio::spawn(async move {
            axum::serve(http, app).await.unwrap();
        });

        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let tcp_addr = tcp.local_addr().unwrap();
        tokio::spawn(accept_loop(tcp, Arc::clone(&relay), shared, true));

        let mut source = TcpStream::connect(tcp_addr).await.unwrap();
        let key = SessionKey::from(source.local_addr().unwrap());
        source.write_all(b"hello\n").await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while relay
                .lookup_session(&key)
                .map(|s| s.buffered_bytes() < 7)
                .unwrap_or(true)
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("session never buffered output");

        let url = format!("ws://{http_addr}/socket/{key}show/ws");
        let (mut ws, _) = connect_async(url).await.unwrap();
        assert_eq!(read_binary(&mut ws, 7).await, b"hello\r\n");

        source.write_all(b"world\r\n").await.unwrap();
        assert_eq!(read_binary(&mut ws, 7).await, b"world\r\n");

        ws.send(WsMessage::Text("q".into())).await.unwrap();
        assert_eq!(read_binary(&mut ws, 1).await, b"q");
        let mut got = [0u8; 1];
        source.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"q");

        let listing: RelaySnapshot = {
            let mut stream = TcpStream::connect(http_addr).await.unwrap();
            stream
                .write_all(b"GET /admin/json HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            let mut raw = String::new();
            stream.read_to_string(&mut raw).await.unwrap();
            let body = raw.split("\r\n\r\n").nth(1).expect("http body");
            serde_json::from_str(body).unwrap()
        };
        assert_eq!(listing.session_keys().collect::<Vec<_>>(), vec![&key]);
        assert_eq!(listing.viewers.len(), 1);
        assert!(listing.viewers[0].initialized);

        drop(source);
        ws.close(None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while relay.lookup_session(&key).is_some() || relay.has_viewer_entry(&key) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("registries were not cleaned up");
    }
}
