//! Logging utilities
//!
//! Simple, non-overengineered logging initialization that:
//! - Respects the RUST_LOG environment variable
//! - Falls back to a config-provided filter
//! - Defaults to "info"
//!
//! # Usage
//!
//! ```rust,no_run
//! use poolwire::utils::init_logging;
//!
//! init_logging(None); // Uses RUST_LOG or defaults to "info"
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging for the process
///
/// Uses standard Rust logging practices:
/// - Respects RUST_LOG environment variable (standard practice)
/// - Falls back to the config filter if provided
/// - Defaults to "info" level
///
/// # Arguments
/// * `filter` - Optional log filter from config (e.g., "info",
///   "poolwire=debug,poolwire::network=trace"). If None, uses the RUST_LOG
///   environment variable or defaults to "info".
pub fn init_logging(filter: Option<&str>) {
    // RUST_LOG always takes precedence (standard practice)
    let mut env_filter = EnvFilter::from_default_env();

    if std::env::var("RUST_LOG").is_err() {
        env_filter = match filter {
            Some(f) => EnvFilter::new(f),
            None => EnvFilter::new("info"),
        };
    }

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true) // Include module path - useful for debugging
                .with_thread_ids(false) // Disable by default (can be noisy)
                .with_ansi(std::env::var("NO_COLOR").is_err()), // Respect NO_COLOR standard
        )
        .with(env_filter)
        .init();
}
