//! Tracing subscriber setup.
//!
//! JSON lines on stdout for Cloud Logging, filtered by `RUST_LOG`:
//!
//! ```bash
//! export RUST_LOG=ferry_worker=debug,ferry_runtime=debug
//! ```

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str =
    "ferry_worker=info,ferry_runtime=info,ferry_cloud_gcp=info,tower_http=info";

/// Install the global subscriber
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing() -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
}
