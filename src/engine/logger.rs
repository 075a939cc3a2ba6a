//! Structured Logging for the Danbooru Downloader
//!
//! This module provides functionality for:
//! 1. Filtering by the configured level, overridable through `RUST_LOG`
//! 2. Writing logs to a daily rotating file in JSON or line format
//! 3. Falling back to stderr when file logging is disabled

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan, time::ChronoUtc},
    prelude::*,
};

use crate::engine::config_loader::Logging;

pub const LOG_FILE_NAME: &str = "danbooru_downloader.log";

/// Error types for logging
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type for logging operations
pub type LoggerResult<T> = Result<T, LoggerError>;

/// Keeps the non-blocking writer alive. Dropping it flushes pending lines.
pub struct Logger {
    log_dir: Option<PathBuf>,
    _guard: Option<WorkerGuard>,
}

impl Logger {
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

fn build_filter(level: &str) -> LoggerResult<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| LoggerError::Logging(e.to_string()))
}

/// Install the global subscriber.
pub fn init_logger(log_dir: &Path, settings: &Logging) -> LoggerResult<Logger> {
    let filter = build_filter(&settings.log_level)?;

    if !settings.log_to_file {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()
            .map_err(|e| LoggerError::Logging(e.to_string()))?;

        return Ok(Logger {
            log_dir: None,
            _guard: None,
        });
    }

    if !log_dir.exists() {
        std::fs::create_dir_all(log_dir)?;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let layer = match settings.log_format.as_str() {
        "json" => fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_timer(ChronoUtc::rfc_3339())
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
        _ => fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_timer(ChronoUtc::rfc_3339())
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| LoggerError::Logging(e.to_string()))?;

    info!(
        log_format = %settings.log_format,
        log_level = %settings.log_level,
        log_dir = %log_dir.display(),
        "Logger initialized"
    );

    Ok(Logger {
        log_dir: Some(log_dir.to_path_buf()),
        _guard: Some(guard),
    })
}

