use std::io;
use std::path::Path;

use tracing::dispatcher::DefaultGuard;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{registry, Layer};

// Helper struct to store the logger guards. When they are dropped, logging is reset.
#[allow(dead_code)]
pub struct LogGuards {
    log_guard: Option<WorkerGuard>,
    default: DefaultGuard,
}

pub fn init_std_out_logging_thread_local() -> DefaultGuard {
    let collector = registry().with(
        fmt::Layer::new()
            .with_writer(io::stdout)
            .with_filter(LevelFilter::INFO),
    );
    tracing::subscriber::set_default(collector)
}

/// Console logging plus a JSON log file in `output_dir`. Used by the run binary so a
/// simulation leaves a machine-readable trace next to its other outputs.
pub fn init_logging(output_dir: &Path) -> LogGuards {
    let log_file_appender = rolling::never(output_dir, "log_evsim.txt");
    let (log_file, log_guard) = non_blocking(log_file_appender);
    let file_layer = fmt::Layer::new()
        .with_writer(log_file)
        .json()
        .with_ansi(false)
        .with_filter(LevelFilter::INFO);

    let console_layer = fmt::layer()
        .with_writer(io::stdout)
        .with_filter(LevelFilter::INFO);

    let collector = registry().with(file_layer).with(console_layer);
    let default = tracing::subscriber::set_default(collector);

    LogGuards {
        log_guard: Some(log_guard),
        default,
    }
}
