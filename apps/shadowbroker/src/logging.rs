//! Tracing subscriber setup.

use crate::config::LogConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
/// With a log directory, output goes to a daily-rotated file and the returned
/// guard must be held until exit so buffered lines are flushed.
pub fn init(cfg: &LogConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.level));
    match &cfg.dir {
        Some(dir) => {
            let _ = std::fs::create_dir_all(dir);
            let file_appender = rolling::daily(dir, "shadowbroker.log");
            let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(nb_writer)
                .with_ansi(false)
                .compact()
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact()
                .init();
            None
        }
    }
}
