//! Log output for the pipeline
//!
//! Output is produced only when `debug_log_enabled` is set and the build
//! is not an app store build; otherwise every pipeline target is `off`.

use appinsights_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

const TARGETS: [&str; 5] = [
    "appinsights",
    "appinsights_core",
    "appinsights_persistence",
    "appinsights_channel",
    "appinsights_crash",
];

/// Filter directive for the pipeline's own targets.
pub fn filter_directive(config: &LoggingConfig) -> String {
    let level = if config.is_enabled() {
        config.level.as_str()
    } else {
        "off"
    };
    TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Installs a global fmt subscriber.
///
/// `RUST_LOG` takes precedence when logging is enabled. Returns `false`
/// when the host already installed a subscriber, which is left in place.
pub fn init(config: &LoggingConfig) -> bool {
    let env_filter = if config.is_enabled() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(config)))
    } else {
        EnvFilter::new(filter_directive(config))
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
