use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{self, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

pub const LOG_FILE_NAME: &str = "mangadex-cover-fetcher.log";

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("subscriber init failed: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Keeps the file writer alive; drop it last so buffered lines are flushed.
pub struct LogGuard {
    _guard: WorkerGuard,
    pub log_file: PathBuf,
}

/// Console output at INFO (DEBUG with `debug`), and a full DEBUG run log in
/// `log_dir`.
pub fn init(log_dir: &Path, debug: bool) -> Result<LogGuard, LogError> {
    fs::create_dir_all(log_dir)?;
    let file_appender = rolling::never(log_dir, LOG_FILE_NAME);
    let (file_writer, guard) = non_blocking::NonBlockingBuilder::default()
        .lossy(false)
        .finish(file_appender);

    let console_level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_writer(io::stdout)
        .with_filter(console_level);

    let file_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(LogGuard {
        _guard: guard,
        log_file: log_dir.join(LOG_FILE_NAME),
    })
}
