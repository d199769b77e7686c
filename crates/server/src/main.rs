//! seeshell server
//!
//! Relays raw TCP byte streams to browser viewers over WebSocket and lets
//! interactive viewers type back into them.

mod broadcast;
mod buffer;
mod config;
mod logging;
mod routes;
mod session;
mod state;
mod tcp;
mod viewer;
mod websocket;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use arc_swap::ArcSwap;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::{Overrides, Settings, SharedSettings};
use crate::state::{AppState, Relay};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "seeshell", version = VERSION, about = "Watch and drive TCP terminal streams from a browser")]
struct Cli {
    /// TOML config file (watched for changes)
    #[arg(short, long, env = "SEESHELL_CONFIG", default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay (default)
    Start,
    /// Print the effective configuration and exit
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = config::load(&cli.config, &cli.overrides)?;

    match cli.command {
        Some(Command::ShowConfig) => {
            print!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }
        Some(Command::Start) | None => run(cli, settings).await,
    }
}

async fn run(cli: Cli, settings: Settings) -> anyhow::Result<()> {
    let logging = Arc::new(logging::init_logging(&settings)?);

    info!(
        component = "server",
        event = "server.starting",
        version = VERSION,
        config = %cli.config.display(),
        log_dir = ?logging.log_path,
        "Starting seeshell"
    );

    let shared: SharedSettings = Arc::new(ArcSwap::from_pointee(settings.clone()));
    let relay = Arc::new(Relay::new());

    let _watcher = {
        let logging = Arc::clone(&logging);
        match config::watch(
            cli.config.clone(),
            cli.overrides.clone(),
            Arc::clone(&shared),
            move |reloaded| logging.set_debug(reloaded.debug),
        ) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(
                    component = "config",
                    event = "config.watch_disabled",
                    error = %e,
                    "Config hot reload disabled"
                );
                None
            }
        }
    };

    for (address, transparent) in [
        (&settings.tcp_address, false),
        (&settings.tcp_transparent_address, true),
    ] {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("failed to bind TCP listener on {address}"))?;
        info!(
            component = "tcp",
            event = "tcp.listening",
            address = %listener.local_addr()?,
            transparent,
            "TCP listener ready"
        );
        tokio::spawn(tcp::accept_loop(
            listener,
            Arc::clone(&relay),
            Arc::clone(&shared),
            transparent,
        ));
    }

    let app = routes::router(AppState::new(relay, shared), &settings);

    if let Some((cert, key)) = settings.tls_files() {
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
            .await
            .context("failed to load TLS certificate")?;
        let addr: SocketAddr = tokio::net::lookup_host(&settings.http_address)
            .await?
            .next()
            .with_context(|| format!("{} did not resolve", settings.http_address))?;
        info!(
            component = "http",
            event = "http.listening",
            address = %addr,
            tls = true,
            "Listening on {}",
            addr
        );
        axum_server::bind_rustls(addr, tls)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = TcpListener::bind(&settings.http_address)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {}", settings.http_address))?;
        info!(
            component = "http",
            event = "http.listening",
            address = %listener.local_addr()?,
            tls = false,
            "Listening on {}",
            listener.local_addr()?
        );
        axum::serve(listener, app).await?;
    }

    Ok(())
}
