//! Runtime configuration.
//!
//! Resolved from: CLI flag / `SEESHELL_*` env > TOML config file > defaults.
//! The file is watched and re-read on change; the listener addresses, TLS,
//! static dir and secret path stay bound to their start-up values.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use clap::Args;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use seeshell_protocol::PublicEndpoint;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub type SharedSettings = Arc<ArcSwap<Settings>>;

/// Path segments the secret listing must not shadow
const RESERVED_SEGMENTS: &[&str] = &["health", "socket", "static"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to watch config file: {0}")]
    Watch(#[from] notify::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    pub tcp_address: String,
    pub tcp_transparent_address: String,
    pub http_address: String,
    /// Domain printed in banners
    pub http_domain: String,
    /// Port printed in banners
    pub http_port: u16,
    /// Print `https` in banners (TLS terminated by a reverse proxy)
    pub https_enabled: bool,
    /// Serves the session listing when non-empty
    pub secret_path: String,
    pub static_dir: PathBuf,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub debug: bool,
    /// Forward input from observe-mode viewers to the TCP peer
    pub forward_observer_input: bool,
    pub log_to_stdout: bool,
    pub log_to_file: bool,
    pub log_dir: Option<PathBuf>,
    pub log_max_files: usize,
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tcp_address: "localhost:8081".into(),
            tcp_transparent_address: "localhost:8082".into(),
            http_address: "localhost:8080".into(),
            http_domain: "localhost".into(),
            http_port: 8080,
            https_enabled: false,
            secret_path: String::new(),
            static_dir: PathBuf::from("static"),
            tls_cert: None,
            tls_key: None,
            debug: false,
            forward_observer_input: true,
            log_to_stdout: true,
            log_to_file: false,
            log_dir: None,
            log_max_files: 3,
            log_format: LogFormat::Json,
        }
    }
}

impl Settings {
    pub fn public_endpoint(&self) -> PublicEndpoint {
        PublicEndpoint {
            https: self.https_enabled,
            domain: self.http_domain.clone(),
            port: self.http_port,
        }
    }

    /// Secret listing path without surrounding slashes, if enabled
    pub fn secret_segment(&self) -> Option<&str> {
        let trimmed = self.secret_path.trim_matches('/');
        (!trimmed.is_empty()).then_some(trimmed)
    }

    pub fn tls_files(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(secret) = self.secret_segment() {
            if secret.contains('/') {
                return Err(ConfigError::Invalid(format!(
                    "secret-path must be a single path segment, got {secret:?}"
                )));
            }
            if RESERVED_SEGMENTS.contains(&secret) {
                return Err(ConfigError::Invalid(format!(
                    "secret-path {secret:?} collides with a built-in route"
                )));
            }
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(ConfigError::Invalid(
                "tls-cert and tls-key must be set together".into(),
            ));
        }
        Ok(())
    }
}

/// Command-line / environment overrides. Unset values fall through to the
/// config file.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// TCP address for sources that get a banner line
    #[arg(long, env = "SEESHELL_TCP_ADDRESS")]
    pub tcp_address: Option<String>,

    /// TCP address for sources that get no banner
    #[arg(long, env = "SEESHELL_TCP_TRANSPARENT_ADDRESS")]
    pub tcp_transparent_address: Option<String>,

    /// HTTP/WebSocket listen address
    #[arg(long, env = "SEESHELL_HTTP_ADDRESS")]
    pub http_address: Option<String>,

    /// Domain printed in banners
    #[arg(long, env = "SEESHELL_HTTP_DOMAIN")]
    pub http_domain: Option<String>,

    /// Port printed in banners
    #[arg(long, env = "SEESHELL_HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Print https:// in banners
    #[arg(long, env = "SEESHELL_HTTPS_ENABLED", num_args = 0..=1, default_missing_value = "true")]
    pub https_enabled: Option<bool>,

    /// Path serving the list of live sessions (empty disables it)
    #[arg(long, env = "SEESHELL_SECRET_PATH")]
    pub secret_path: Option<String>,

    /// Directory served under /static
    #[arg(long, env = "SEESHELL_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// PEM certificate for serving HTTPS directly
    #[arg(long, env = "SEESHELL_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for serving HTTPS directly
    #[arg(long, env = "SEESHELL_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, env = "SEESHELL_DEBUG", num_args = 0..=1, default_missing_value = "true")]
    pub debug: Option<bool>,

    /// Forward input from observe-mode viewers to the TCP peer
    #[arg(long, env = "SEESHELL_FORWARD_OBSERVER_INPUT", num_args = 0..=1, default_missing_value = "true")]
    pub forward_observer_input: Option<bool>,

    /// Write logs to stdout
    #[arg(long, env = "SEESHELL_LOG_TO_STDOUT", num_args = 0..=1, default_missing_value = "true")]
    pub log_to_stdout: Option<bool>,

    /// Write logs to rotating files in --log-dir
    #[arg(long, env = "SEESHELL_LOG_TO_FILE", num_args = 0..=1, default_missing_value = "true")]
    pub log_to_file: Option<bool>,

    /// Directory for log files (default ~/.seeshell/logs)
    #[arg(long, env = "SEESHELL_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Rotated log files to keep
    #[arg(long, env = "SEESHELL_LOG_MAX_FILES")]
    pub log_max_files: Option<usize>,

    /// Log file format
    #[arg(long, env = "SEESHELL_LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,
}

impl Overrides {
    pub fn apply(&self, mut settings: Settings) -> Settings {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }

        set(&mut settings.tcp_address, &self.tcp_address);
        set(&mut settings.tcp_transparent_address, &self.tcp_transparent_address);
        set(&mut settings.http_address, &self.http_address);
        set(&mut settings.http_domain, &self.http_domain);
        set(&mut settings.http_port, &self.http_port);
        set(&mut settings.https_enabled, &self.https_enabled);
        set(&mut settings.secret_path, &self.secret_path);
        set(&mut settings.static_dir, &self.static_dir);
        set(&mut settings.debug, &self.debug);
        set(&mut settings.forward_observer_input, &self.forward_observer_input);
        set(&mut settings.log_to_stdout, &self.log_to_stdout);
        set(&mut settings.log_to_file, &self.log_to_file);
        set(&mut settings.log_max_files, &self.log_max_files);
        set(&mut settings.log_format, &self.log_format);
        if self.tls_cert.is_some() {
            settings.tls_cert = self.tls_cert.clone();
        }
        if self.tls_key.is_some() {
            settings.tls_key = self.tls_key.clone();
        }
        if self.log_dir.is_some() {
            settings.log_dir = self.log_dir.clone();
        }
        settings
    }
}

/// Read `path` (missing is fine), apply overrides and validate.
pub fn load(path: &Path, overrides: &Overrides) -> Result<Settings, ConfigError> {
    let base = match std::fs::read_to_string(path) {
        Ok(text) => toml::from_str::<Settings>(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let settings = overrides.apply(base);
    settings.validate()?;
    Ok(settings)
}

/// Watch the config file and swap in fresh settings when it changes.
///
/// `on_reload` runs after every successful swap. The returned watcher must be
/// kept alive for as long as reloading is wanted.
pub fn watch(
    path: PathBuf,
    overrides: Overrides,
    shared: SharedSettings,
    on_reload: impl Fn(&Settings) + Send + 'static,
) -> Result<RecommendedWatcher, ConfigError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path.file_name().map(|n| n.to_os_string());

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    component = "config",
                    event = "config.watch_error",
                    error = %e,
                    "Config watcher error"
                );
                return;
            }
        };

        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }
        let touches_config = event
            .paths
            .iter()
            .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
        if !touches_config {
            return;
        }

        match load(&path, &overrides) {
            Ok(settings) => {
                if **shared.load() == settings {
                    return;
                }
                on_reload(&settings);
                shared.store(Arc::new(settings));
                info!(
                    component = "config",
                    event = "config.reloaded",
                    path = %path.display(),
                    "Reloaded configuration file"
                );
            }
            Err(e) => {
                warn!(
                    component = "config",
                    event = "config.reload_failed",
                    error = %e,
                    "Keeping previous configuration"
                );
            }
        }
    })?;

    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}
