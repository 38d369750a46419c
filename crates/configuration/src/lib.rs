use crate::error::ConfigError;
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use logging::init_tracing;
pub use settings::{
    BacktestConfig, Config, GeneratorConfig, LogFormat, LoggingConfig, MetricsConfig, PortfolioConfig,
    PromotionThresholds, SchedulerConfig, StoreConfig, StrategyConfig, SystemConfig,
    MAX_PORTFOLIO_CAPACITY,
};

/// Prefix of environment overrides, e.g. `ASES__SYSTEM__MAX_CONCURRENT_STRATEGIES=8`.
pub const ENV_PREFIX: &str = "ASES";

/// Loads and validates the application configuration.
///
/// Layers, lowest precedence first: built-in defaults, the TOML file at `path`
/// (optional), then `ASES__`-prefixed environment variables.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    load_config_with_overrides(path, None)
}

/// Like [`load_config`], with a JSON document (typically persisted in the state
/// store) layered between the file and the environment.
pub fn load_config_with_overrides(
    path: impl AsRef<Path>,
    overrides: Option<&str>,
) -> Result<Config, ConfigError> {
    let mut builder =
        config::Config::builder().add_source(config::File::from(path.as_ref()).required(false));
    if let Some(json) = overrides {
        builder = builder.add_source(config::File::from_str(json, config::FileFormat::Json));
    }
    let builder = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("strategy.available_timeframes")
                .with_list_parse_key("strategy.available_indicators"),
        )
        .build()?;

    let config = builder.try_deserialize::<Config>()?;
    config.validate()?;

    Ok(config)
}
