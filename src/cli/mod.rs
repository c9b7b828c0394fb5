//! CLI module for RagBuddy
//!
//! Handles command-line argument parsing and log initialisation.

pub mod args;

pub use args::{Args, Commands, Verbosity};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber, logging to stderr
///
/// `RUST_LOG` overrides the verbosity-derived filter.
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.log_filter()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(matches!(verbosity, Verbosity::VeryVerbose))
        .try_init();
}
