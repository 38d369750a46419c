use crate::error::ConfigError;
use crate::settings::{LogFormat, LoggingConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `logging.level`. When `logging.directory`
/// is set, a daily-rolling JSON file is written alongside the console output;
/// the returned guard must be held for the lifetime of the process so the
/// background writer flushes.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>, ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ConfigError::Logging(format!("invalid filter '{}': {}", config.level, e)))?;

    let console: BoxedLayer = match config.format {
        LogFormat::Pretty => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(false).boxed(),
    };
    let mut layers = vec![console];

    let guard = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "ases.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(fmt::layer().json().with_ansi(false).with_writer(writer).boxed());
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    Ok(guard)
}
