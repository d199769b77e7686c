//! `seeshell-cli watch`: attach to a session over WebSocket.

use anyhow::{bail, Context};
use futures::{SinkExt, StreamExt};
use seeshell_protocol::{SessionKey, ViewMode, ViewerRoute};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

pub async fn run(base_url: &str, key: &str, interactive: bool) -> anyhow::Result<()> {
    let mode = if interactive {
        ViewMode::Interactive
    } else {
        ViewMode::Observe
    };
    let url = viewer_ws_url(base_url, &ViewerRoute::new(SessionKey::new(key), mode))?;
    let (ws, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    let (mut write, mut read) = ws.split();

    let input_task = interactive.then(|| {
        tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            let mut buf = [0u8; 1024];
            loop {
                let n = stdin.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                write.send(Message::Binary(buf[..n].to_vec().into())).await?;
            }
            write.send(Message::Close(None)).await?;
            Ok::<_, anyhow::Error>(())
        })
    });

    let mut stdout = tokio::io::stdout();
    while let Some(msg) = read.next().await {
        match msg? {
            Message::Binary(data) => stdout.write_all(&data).await?,
            Message::Text(text) => stdout.write_all(text.as_bytes()).await?,
            Message::Close(_) => break,
            _ => continue,
        }
        stdout.flush().await?;
    }

    if let Some(task) = input_task {
        task.abort();
    }
    Ok(())
}

/// `http(s)://host:port` + route -> `ws(s)://host:port/socket/{segment}/ws`
fn viewer_ws_url(base_url: &str, route: &ViewerRoute) -> anyhow::Result<String> {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        bail!("unsupported URL scheme in {base_url}");
    };
    Ok(format!(
        "{ws_base}/socket/{}/ws",
        urlencoding::encode(&route.to_segment())
    ))
}
