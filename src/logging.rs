use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Install the global subscriber. Logs go to stderr so stdout stays clean for output.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.json {
        builder.json().with_target(true).init();
    } else {
        builder.with_target(false).init();
    }
}
