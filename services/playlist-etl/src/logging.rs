//!
//! src/logging.rs
//!
//! Initializes logger so each pipeline stage emits structured,
//! informative events while running
//!
//!

use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use tracing_error::ErrorLayer;
use tracing_appender::non_blocking;

use crate::config::{LogFormat, LoggingConfig};
use crate::errors::EtlError;

/// Keeps the non-blocking writer flushing until dropped
pub struct LoggingGuard(#[allow(dead_code)] tracing_appender::non_blocking::WorkerGuard);

pub fn init_logging(cfg: &LoggingConfig) -> Result<LoggingGuard, EtlError> {
    let (writer, guard) = non_blocking(std::io::stdout());
    let filter = std::env::var("RUST_LOG")
        .ok()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new(cfg.filter_directives.clone()));

    let time = fmt::time::UtcTime::rfc_3339();
    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .with_timer(time)
        .with_ansi(cfg.with_ansi && cfg.format == LogFormat::Pretty)
        .with_target(cfg.include_target)
        .with_file(cfg.include_file_line)
        .with_line_number(cfg.include_file_line);

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default());

    let installed = match cfg.format {
        LogFormat::Json => registry
            .with(fmt_layer
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt_layer.pretty())
            .try_init(),
    };
    installed.map_err(|e| EtlError::Config(format!("install subscriber: {e}")))?;

    Ok( LoggingGuard(guard) )
}
