use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LogFormat, Settings};

const DEFAULT_FILTER: &str = "info,tower_http=warn,hyper=warn";
const DEBUG_FILTER: &str = "debug,tower_http=debug,hyper=warn";

type Filtered = Layered<reload::Layer<EnvFilter, Registry>, Registry>;
type BoxedLayer = Box<dyn Layer<Filtered> + Send + Sync>;

pub struct LoggingHandle {
    pub log_path: Option<PathBuf>,
    filter: reload::Handle<EnvFilter, Registry>,
    _guard: Option<WorkerGuard>,
}

impl LoggingHandle {
    /// Swap the active filter, e.g. after `debug` changed in a config reload.
    pub fn set_debug(&self, debug: bool) {
        if let Err(e) = self.filter.modify(|filter| *filter = filter_for(debug)) {
            tracing::warn!(
                component = "logging",
                event = "logging.reload_failed",
                error = %e,
                "Failed to swap log filter"
            );
        }
    }
}

fn filter_for(debug: bool) -> EnvFilter {
    if debug {
        return EnvFilter::new(DEBUG_FILTER);
    }
    std::env::var("SEESHELL_LOG_FILTER")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

pub fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".seeshell")
        .join("logs")
}

pub fn init_logging(settings: &Settings) -> anyhow::Result<LoggingHandle> {
    let (filter, filter_handle) = reload::Layer::new(filter_for(settings.debug));

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if settings.log_to_stdout {
        layers.push(fmt::layer().with_target(false).boxed());
    }

    let mut guard = None;
    let mut log_path = None;
    if settings.log_to_file {
        let log_dir = settings.log_dir.clone().unwrap_or_else(default_log_dir);
        std::fs::create_dir_all(&log_dir)?;

        let file_appender = RollingBuilder::new()
            .rotation(Rotation::DAILY)
            .filename_prefix("seeshell")
            .filename_suffix("log")
            .max_log_files(settings.log_max_files.max(1))
            .build(&log_dir)?;
        let (writer, worker_guard) = tracing_appender::non_blocking(file_appender);

        let layer = match settings.log_format {
            LogFormat::Pretty => fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .pretty()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .with_writer(writer)
                .json()
                .flatten_event(true)
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_current_span(true)
                .boxed(),
        };
        layers.push(layer);
        guard = Some(worker_guard);
        log_path = Some(log_dir);
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .init();

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        log_dir = ?log_path.as_ref().map(|p| p.display().to_string()),
        format = ?settings.log_format,
        debug = settings.debug,
    );

    Ok(LoggingHandle {
        log_path,
        filter: filter_handle,
        _guard: guard,
    })
}
