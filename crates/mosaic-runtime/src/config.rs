//! Environment-driven runtime configuration
//!
//! All knobs are read once per process and cached; changing the environment
//! after the first read has no effect.

use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable controlling the global-await timeout, in seconds.
pub const WAIT_TIMEOUT_ENV: &str = "MOSAIC_WAIT_TIMEOUT";

/// Default global-await timeout when [`WAIT_TIMEOUT_ENV`] is unset or invalid.
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 900;

static WAIT_TIMEOUT: OnceLock<Duration> = OnceLock::new();

/// The timeout applied to global waits (blocking future reads, collective
/// rendezvous, and lazy-cleanup drains).
pub fn wait_timeout() -> Duration {
    *WAIT_TIMEOUT.get_or_init(|| {
        let seconds = std::env::var(WAIT_TIMEOUT_ENV)
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_WAIT_TIMEOUT_SECS);
        Duration::from_secs(seconds)
    })
}
