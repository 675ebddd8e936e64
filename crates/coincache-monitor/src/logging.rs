//! Logging setup.

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Setup logging with the given level.
///
/// `RUST_LOG` overrides `level` when set. With `file`, events are also
/// written there through a non-blocking writer; keep the returned guard
/// alive until shutdown so buffered lines are flushed.
pub fn setup_logging(level: &str, json: bool, file: Option<&Path>) -> io::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(path)?);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(fmt::layer().pretty())
            .init();
    }

    Ok(guard)
}

fn file_appender(path: &Path) -> io::Result<tracing_appender::rolling::RollingFileAppender> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "log file path has no file name")
    })?;

    fs::create_dir_all(dir)?;
    Ok(tracing_appender::rolling::never(dir, name))
}
