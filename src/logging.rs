use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::LoggingConfig;

const DEFAULT_LEVEL: &str = "info";
const LOG_FILE_PREFIX: &str = "prebuilds";

fn rotation(value: Option<&str>) -> Rotation {
    match value.map(str::to_ascii_lowercase).as_deref() {
        Some("hourly") => Rotation::HOURLY,
        Some("never") => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

/// Install the global subscriber: console output plus an optional rolling log file.
///
/// The returned guard flushes the file writer when dropped, so keep it alive for the
/// lifetime of the process.
pub fn setup_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let level = config.level.as_deref().unwrap_or(DEFAULT_LEVEL);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console = fmt::layer().with_target(false).boxed();

    let (file, guard) = match &config.directory {
        Some(directory) => match std::fs::create_dir_all(directory) {
            Ok(()) => {
                let appender = RollingFileAppender::new(
                    rotation(config.rotation.as_deref()),
                    directory,
                    LOG_FILE_PREFIX,
                );
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
                (Some(layer), Some(guard))
            }
            Err(e) => {
                eprintln!("Failed to create log directory '{}': {}", directory, e);
                (None, None)
            }
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    if config.directory.is_some() && guard.is_none() {
        warn!("File logging disabled, writing to console only");
    }
    guard
}
