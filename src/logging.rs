//! Logging setup
//!
//! The crate logs through the `log` facade. Binaries call `init` once;
//! tests and embedders may call `try_init`, which tolerates an existing logger.
//! `RUST_LOG` always wins over the default filter.

use env_logger::{Builder, Env};

fn default_filter(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

fn builder(debug: bool) -> Builder {
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter(debug)));
    builder.format_timestamp_millis();
    builder
}

/// Installs `env_logger` as the global logger. Panics if one is already set.
pub fn init(debug: bool) {
    builder(debug).init();
}

/// Like `init`, but returns false instead of panicking when a logger exists
pub fn try_init(debug: bool) -> bool {
    builder(debug).try_init().is_ok()
}
