//! Logging utilities.

use tracing_subscriber::{fmt, EnvFilter};

use crate::utils::scrub::ScrubMakeWriter;

/// Initialize the global logger.
///
/// Unless `unsafe_logging` is set, log output passes through the IP
/// scrubber before reaching stderr.
pub fn init_logger(unsafe_logging: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if unsafe_logging {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(ScrubMakeWriter)
            .init();
    }
}
