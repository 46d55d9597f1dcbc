//! Logging bootstrap
//!
//! `tracing` is used throughout the workspace; binaries call [`init`] once to
//! install the subscriber.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `default_level`. Returns `false` when a subscriber was
/// already installed (e.g. a second call from tests).
pub fn init(default_level: &str) -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}
