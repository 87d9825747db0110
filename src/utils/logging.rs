// src/utils/logging.rs
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::utils::config::LoggingConfig;
use crate::utils::error::{NodeError, Result};

fn filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| NodeError::Config(format!("Invalid log level '{}': {}", level, e)))
}

/// Installs the service subscriber. `RUST_LOG` takes precedence over the
/// configured level. With a log directory set, output is also written to a
/// daily rolling file; keep the returned guard alive to flush it.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let console = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);
    let registry = tracing_subscriber::registry()
        .with(filter(&config.level)?)
        .with(console);

    let guard = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()
                .map_err(|e| NodeError::Config(e.to_string()))?;
            Some(guard)
        }
        None => {
            registry
                .try_init()
                .map_err(|e| NodeError::Config(e.to_string()))?;
            None
        }
    };

    Ok(guard)
}

/// Worker processes log to stderr only; stdout carries the protocol. The
/// level stays the first token of each line so the parent can classify it.
pub fn init_worker(level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(level)?)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .without_time()
        .with_target(false)
        .try_init()
        .map_err(|e| NodeError::Config(e.to_string()))
}
