//! Tracing setup for programs embedding the review workflow

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a stdout subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Returns false if a global subscriber was already installed, which makes
/// repeated calls (tests, embedding programs) harmless.
pub fn init(default_filter: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init()
        .is_ok()
}
