use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Filter directives, e.g. `PLATEMATES_LOG=platemates=debug`
pub const LOG_ENV_VAR: &str = "PLATEMATES_LOG";

/// Directory for the daily log files.
pub fn log_dir() -> Option<PathBuf> {
  dirs::data_local_dir().map(|dir| dir.join("platemates").join("logs"))
}

/// Log to a daily rolling file so stdout only carries command output.
///
/// Keep the returned guard alive for the life of the process, otherwise
/// buffered lines are lost.
pub fn init() -> Result<WorkerGuard> {
  let dir = log_dir().ok_or_else(|| eyre!("Could not determine a data directory for logs"))?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
    .unwrap_or_else(|_| EnvFilter::new("platemates=info,reqwest=warn,hyper=warn"));

  let (writer, guard) = non_blocking(rolling::daily(&dir, "platemates.log"));

  Registry::default()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
