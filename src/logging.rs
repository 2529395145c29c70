//! Tracing setup for the CLI and workers.
//!
//! Everything goes to a compact stdout layer. A second layer writes to `DOCULENS_LOG_FILE`
//! when set, or to `logs/doculens.log`, through a non-blocking appender. The file layer also
//! records span closes so pipeline and node timings end up in the log.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "doculens.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where the file layer writes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LogDestination {
    /// Append to an explicit file.
    File(PathBuf),
    /// Default file under the `logs` directory.
    Default,
}

impl LogDestination {
    fn from_env_value(value: Option<String>) -> Self {
        match value.map(|value| value.trim().to_string()) {
            Some(path) if !path.is_empty() => Self::File(PathBuf::from(path)),
            _ => Self::Default,
        }
    }

    fn path(&self) -> PathBuf {
        match self {
            Self::File(path) => path.clone(),
            Self::Default => Path::new(DEFAULT_LOG_DIR).join(DEFAULT_LOG_FILE),
        }
    }
}

/// Install the global subscriber.
///
/// Respects `RUST_LOG` (defaults to `info`). A second call leaves the already-installed
/// subscriber in place.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    let destination = LogDestination::from_env_value(std::env::var("DOCULENS_LOG_FILE").ok());
    match open_writer(&destination) {
        Some(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .compact();
            let _ = registry.with(file_layer).try_init();
        }
        None => {
            let _ = registry.try_init();
        }
    }
}

/// Non-blocking writer for `destination`, or `None` when the file cannot be opened.
fn open_writer(destination: &LogDestination) -> Option<NonBlocking> {
    let path = destination.path();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(err) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create log directory {}: {err}", parent.display());
        return None;
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    {
        Ok(file) => file,
        Err(err) => {
            eprintln!("Failed to open log file {}: {err}", path.display());
            return None;
        }
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let _ = LOG_GUARD.set(guard);
    Some(non_blocking)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_override_uses_default_file() {
        assert_eq!(LogDestination::from_env_value(None), LogDestination::Default);
        assert_eq!(
            LogDestination::from_env_value(Some("  ".into())),
            LogDestination::Default
        );
        assert_eq!(
            LogDestination::Default.path(),
            PathBuf::from("logs/doculens.log")
        );
    }

    #[test]
    fn explicit_file_is_trimmed() {
        let destination = LogDestination::from_env_value(Some(" /tmp/run.log ".into()));
        assert_eq!(destination.path(), PathBuf::from("/tmp/run.log"));
    }
}
