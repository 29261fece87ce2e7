//! Logging initialization

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, filter::Targets, fmt, prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

/// Install the global subscriber. Verbose mode turns on debug output for
/// this crate only; `RUST_LOG` overrides both.
pub fn init_logging(verbose: bool) {
    let (crate_filter, fallback) = if verbose {
        (LevelFilter::DEBUG, "debug")
    } else {
        (LevelFilter::OFF, "off")
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(fmt::layer().pretty().without_time())
        .with(Targets::new().with_target("fxdash", crate_filter))
        .with(env_filter)
        .init();
}
