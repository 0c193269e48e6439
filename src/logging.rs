use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_FILE_PREFIX: &str = "pocket-trello-sync.log";

/// Rotated files kept alongside the active one.
const MAX_LOG_FILES: usize = 7;

pub struct LogConfig {
    pub log_dir: PathBuf,
    pub rotation: Rotation,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("."),
            rotation: Rotation::DAILY,
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install stdout and rolling-file layers. Keep the returned guard alive for
/// the whole run so buffered file output is flushed on exit.
pub fn init_logging(config: LogConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("failed to create log dir {}", config.log_dir.display()))?;
    let appender = RollingFileAppender::builder()
        .rotation(config.rotation)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(MAX_LOG_FILES)
        .build(&config.log_dir)
        .context("failed to open log file")?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_filter(env_filter());
    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .compact()
        .with_filter(env_filter());

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(guard)
}
