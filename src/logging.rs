//! Tracing setup
//!
//! Console output always; a daily rolling file when `logging.dir` is set.
//! `RUST_LOG` wins over the configured level.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::{Result, WatchError};

type FilteredRegistry = tracing_subscriber::layer::Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// life of the process.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| WatchError::Internal(format!("invalid log filter {}: {}", config.level, e)))?;

    let mut layers: Vec<BoxedLayer> = Vec::with_capacity(2);
    layers.push(console_layer(config.json));

    let mut guard = None;
    if let Some(dir) = config.dir.as_deref() {
        match file_layer(dir, &config.file_prefix, config.json) {
            Ok((layer, file_guard)) => {
                layers.push(layer);
                guard = Some(file_guard);
            }
            Err(e) => {
                // Subscriber is not up yet
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    dir, e
                );
            }
        }
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()
        .map_err(|e| WatchError::Internal(format!("logging already initialized: {}", e)))?;

    if guard.is_some() {
        tracing::info!("Logging to: {}/{}.log", config.dir.as_deref().unwrap_or_default(), config.file_prefix);
    }
    Ok(guard)
}

fn console_layer(json: bool) -> BoxedLayer {
    if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    }
}

fn file_layer(dir: &str, prefix: &str, json: bool) -> std::io::Result<(BoxedLayer, WorkerGuard)> {
    // rolling::daily panics if it cannot create the first file
    std::fs::create_dir_all(dir)?;
    let probe = Path::new(dir).join(format!(".{prefix}_write_test"));
    std::fs::OpenOptions::new().create(true).append(true).open(&probe)?;
    let _ = std::fs::remove_file(&probe);

    let appender = tracing_appender::rolling::daily(dir, format!("{prefix}.log"));
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false) // No color codes in file
            .with_target(true)
            .boxed()
    };
    Ok((layer, guard))
}
