//! Subscriber setup for the lifeline binary.
//!
//! Everything goes to stderr. `run` additionally writes `session_<ID>.log` in the lock
//! directory, which is the file a later crash report tails.

use std::env;
use std::path::Path;

use lifeline_core::logging::session_log_file_name;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const DEBUG_ENV: &str = "LIFELINE_DEBUG_LOG";

fn env_filter() -> EnvFilter {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Installs the global subscriber. `session_log` is `(lock_dir, session_id)`.
///
/// Keep the returned guard alive until exit; dropping it flushes the file writer.
pub fn init(session_log: Option<(&Path, &str)>) -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter());

    let (file_layer, guard) = match session_log.map(|(dir, id)| session_file_writer(dir, id)) {
        Some(Ok(appender)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(env_filter());
            (Some(layer), Some(guard))
        }
        Some(Err(err)) => {
            eprintln!("lifeline: session log file disabled: {}", err);
            (None, None)
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    guard
}

fn session_file_writer(lock_dir: &Path, session_id: &str) -> Result<RollingFileAppender, String> {
    fs_err::create_dir_all(lock_dir).map_err(|err| err.to_string())?;
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(session_log_file_name(session_id))
        .build(lock_dir)
        .map_err(|err| err.to_string())
}
