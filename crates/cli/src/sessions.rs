//! `seeshell-cli sessions`: tabulate the relay's introspection snapshot.

use anyhow::Context;
use comfy_table::{presets::UTF8_FULL, Table};
use console::style;
use seeshell_protocol::{RelaySnapshot, ViewMode};

pub async fn run(base_url: &str, secret_path: &str) -> anyhow::Result<()> {
    let endpoint = snapshot_url(base_url, secret_path);
    let snapshot: RelaySnapshot = reqwest::get(&endpoint)
        .await
        .with_context(|| format!("request to {endpoint} failed"))?
        .error_for_status()?
        .json()
        .await
        .context("unexpected response body")?;

    print!("{}", render(&snapshot));
    Ok(())
}

fn snapshot_url(base_url: &str, secret_path: &str) -> String {
    format!(
        "{}/{}/json",
        base_url.trim_end_matches('/'),
        secret_path.trim_matches('/')
    )
}

fn render(snapshot: &RelaySnapshot) -> String {
    if snapshot.sessions.is_empty() && snapshot.viewers.is_empty() {
        return format!("{}\n", style("No live sessions").dim());
    }

    let mut sessions = Table::new();
    sessions
        .load_preset(UTF8_FULL)
        .set_header(vec!["Session", "Connected (unix)", "Buffered", "Viewers"]);
    for s in &snapshot.sessions {
        sessions.add_row(vec![
            s.key.to_string(),
            s.connected_at.to_string(),
            format!("{} B", s.buffered_bytes),
            s.viewers.to_string(),
        ]);
    }

    let mut viewers = Table::new();
    viewers
        .load_preset(UTF8_FULL)
        .set_header(vec!["Viewer", "Session", "Mode", "State"]);
    for v in &snapshot.viewers {
        let mode = match v.mode {
            ViewMode::Observe => "observe",
            ViewMode::Interactive => "interactive",
        };
        let state = if v.dangling {
            "dangling"
        } else if v.initialized {
            "live"
        } else {
            "replaying"
        };
        viewers.add_row(vec![v.id.to_string(), v.key.to_string(), mode.into(), state.into()]);
    }

    format!("{sessions}\n{viewers}\n")
}
