//! Tracing subscriber setup.
//!
//! Filter priority: `QNODE_LOG` > `RUST_LOG` > the CLI default (`info`, or
//! `debug` with `--verbose`). Output goes to stderr so that commands
//! printing JSON on stdout stay machine-readable.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init(verbose: bool) {
    let filter = build_env_filter(verbose);

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

fn build_env_filter(verbose: bool) -> EnvFilter {
    // An unparseable QNODE_LOG falls through to RUST_LOG / default.
    if let Ok(directives) = std::env::var("QNODE_LOG") {
        if let Ok(filter) = EnvFilter::try_new(&directives) {
            return filter;
        }
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = if verbose { "debug" } else { "info" };
    EnvFilter::new(format!("{level},sqlx=warn,hyper=warn"))
}
