//! Logging setup and macros.
//!
//! Library code logs through the `log_*!` macros so every realtime message
//! ends up under the `raptor_client` target. Binaries call [`init`] once.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "raptor_client=debug";

/// Install the global `tracing` subscriber.
///
/// Returns an error if a subscriber is already installed.
pub fn init() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

#[doc(hidden)]
pub fn log_info_impl(msg: &str) {
    tracing::info!(target: "raptor_client", "{}", msg);
}

#[doc(hidden)]
pub fn log_error_impl(msg: &str) {
    tracing::error!(target: "raptor_client", "{}", msg);
}

#[doc(hidden)]
pub fn log_warn_impl(msg: &str) {
    tracing::warn!(target: "raptor_client", "{}", msg);
}

#[doc(hidden)]
pub fn log_debug_impl(msg: &str) {
    tracing::debug!(target: "raptor_client", "{}", msg);
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info_impl(&format!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error_impl(&format!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log_warn_impl(&format!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug_impl(&format!($($arg)*))
    };
}
