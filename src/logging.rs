//! Logging initialisation
//!
//! Installs a `tracing` subscriber with:
//! - an `EnvFilter` from `RUST_LOG`, falling back to the configured level
//! - a pretty stdout layer
//! - a JSON file layer with daily rolling files
//!
//! `log` records from dependencies are bridged into `tracing`. Rolled files
//! from earlier days are gzip-compressed in the background.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or
    /// `storyloom=debug`.
    pub level: String,
    /// Directory for JSON log files. Defaults to the platform data dir.
    pub log_dir: Option<PathBuf>,
    pub file_name: String,
    pub json_file: bool,
    pub stdout: bool,
    pub compress_old_logs: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            file_name: "storyloom.log".to_string(),
            json_file: true,
            stdout: true,
            compress_old_logs: true,
        }
    }
}

impl LoggingConfig {
    pub fn resolved_log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("storyloom").join("logs"))
                .unwrap_or_else(|| PathBuf::from("logs"))
        })
    }
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to install subscriber: {0}")]
    Subscriber(String),
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialise the global subscriber.
///
/// Returns the file writer's `WorkerGuard` when file logging is on; keep it
/// alive for the lifetime of the process so buffered lines are flushed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let mut guard = None;
    let mut log_dir = None;

    let file_layer = if config.json_file {
        let dir = config.resolved_log_dir();
        fs::create_dir_all(&dir).map_err(|source| LoggingError::LogDir {
            path: dir.clone(),
            source,
        })?;
        let appender = tracing_appender::rolling::daily(&dir, &config.file_name);
        let (writer, g) = tracing_appender::non_blocking(appender);
        guard = Some(g);
        log_dir = Some(dir);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .json()
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_target(true)
                .with_filter(env_filter(&config.level)),
        )
    } else {
        None
    };

    let stdout_layer = config.stdout.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stdout)
            .pretty()
            .with_filter(env_filter(&config.level))
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| LoggingError::Subscriber(e.to_string()))?;

    if let Err(e) = tracing_log::LogTracer::init() {
        tracing::debug!(error = %e, "log bridge already installed");
    }

    if let Some(dir) = log_dir {
        tracing::info!(dir = %dir.display(), file = %config.file_name, "Logging initialized (daily rolling)");
        if config.compress_old_logs {
            let file_name = config.file_name.clone();
            std::thread::spawn(move || {
                let today = chrono::Local::now().format("%Y-%m-%d").to_string();
                compress_old_logs(&dir, &file_name, &today);
            });
        }
    }

    Ok(guard)
}

/// Gzip rolled log files not belonging to `today`. Returns how many files
/// were compressed.
pub fn compress_old_logs(log_dir: &Path, file_name: &str, today: &str) -> usize {
    let prefix = format!("{file_name}.");
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };

    let mut compressed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(&prefix) || name.ends_with(today) || name.ends_with(".gz") {
            continue;
        }
        match compress_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Compressed old log");
                compressed += 1;
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to compress old log"),
        }
    }
    compressed
}

fn compress_file(path: &Path) -> io::Result<()> {
    let mut gz_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "No filename"))?
        .to_os_string();
    gz_name.push(".gz");
    let gz_path = path.with_file_name(gz_name);
    if gz_path.exists() {
        return Ok(());
    }

    let mut reader = io::BufReader::new(fs::File::open(path)?);
    let mut encoder = GzEncoder::new(fs::File::create(&gz_path)?, Compression::default());
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?;
    fs::remove_file(path)
}
