//! Tracing subscriber setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "fitsync_runtime=info";

/// Install the global subscriber.
///
/// Returns false if one was already installed, so hosts and tests can call
/// this more than once.
pub fn init() -> bool {
    init_with_default(DEFAULT_FILTER)
}

/// Install the global subscriber with a fallback filter.
pub fn init_with_default(directives: &str) -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| directives.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
