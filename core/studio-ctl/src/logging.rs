//! File logging for studio-ctl.
//!
//! stdout carries command output (often parsed by cron wrappers), so logs go
//! to a daily file under `~/.studio-reminders/logs/`.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_DIR: &str = "logs";
const LOG_PREFIX: &str = "studio-ctl.log";

/// Returns the writer guard; keep it alive for the life of the process so
/// buffered lines are flushed on exit. `None` means logging is disabled.
pub fn init() -> Option<WorkerGuard> {
    let log_dir = dirs::home_dir()?.join(".studio-reminders").join(LOG_DIR);
    fs_err::create_dir_all(&log_dir).ok()?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, LOG_PREFIX));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .try_init()
        .ok()?;

    Some(guard)
}
