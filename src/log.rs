//! Structured logging setup.
//!
//! Events go to `~/.conductor/conductor.log`, truncated on startup, or to
//! stderr when there is no home directory. The default level is INFO; debug
//! mode (`--debug` or `CONDUCTOR_DEBUG=1`) raises it to DEBUG. `RUST_LOG`
//! overrides both.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;

/// Whether `CONDUCTOR_DEBUG` asks for debug output.
pub fn env_debug() -> bool {
    std::env::var("CONDUCTOR_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

fn default_level(debug: bool) -> &'static str {
    if debug {
        "conductor=debug,info"
    } else {
        "info"
    }
}

/// Path of the log file, when a home directory exists.
pub fn log_path() -> Option<PathBuf> {
    Config::conductor_dir().ok().map(|dir| dir.join("conductor.log"))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_with_debug(debug: bool) {
    let level = default_level(debug || env_debug());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file = log_path().and_then(|path| {
        std::fs::create_dir_all(path.parent()?).ok()?;
        File::create(&path).ok()
    });

    let _ = match file {
        Some(file) => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
            .try_init(),
        None => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
}
