//! Tracing setup for the catalog tools.
//!
//! On Linux the journal is used when it is reachable. Otherwise logs go to a
//! daily rolling file, so terminal output stays reserved for command results.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter, e.g. `SHELFMARK_LOG=debug`
/// or `SHELFMARK_LOG=shelfmark::photos=trace`.
pub const LOG_ENV: &str = "SHELFMARK_LOG";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber. Must be called at most once per process.
pub fn init(log_dir: Option<PathBuf>) -> Result<()> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer.with_syslog_identifier("shelfmark".to_string()))
                .init();

            tracing::info!("Logging to journald");
            return Ok(());
        }
    }

    let log_dir = log_dir.unwrap_or_else(default_log_dir);
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "shelfmark.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    // The guard flushes on drop; keep it for the life of the process.
    let _ = FILE_GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .init();

    tracing::info!("Logging to {:?}", log_dir);
    Ok(())
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shelfmark")
        .join("logs")
}
