//! Tracing initialisation.

use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable controlling the log filter, e.g.
/// `FSMONITOR_LOG=debug` or a full tracing directive list.
pub const LOG_ENV: &str = "FSMONITOR_LOG";

/// Install the global subscriber. Quiet by default; `-v` raises the level.
/// Diagnostics go to stderr so they never mix with command output.
pub fn init(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
