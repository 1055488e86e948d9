//! Logging setup
//!
//! Logs go to stderr through `tracing-subscriber`. `RUST_LOG` takes precedence
//! over the verbosity flag, e.g. `RUST_LOG=nutrimelt=trace`.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber; `verbose` lowers the crate's level to debug
pub fn init_logging(verbose: bool) -> Result<()> {
    let default_directives = if verbose { "info,nutrimelt=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("Failed to initialize logging: {}", err))
}
