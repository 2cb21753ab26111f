//! Logging setup
//!
//! Always logs to stderr: stdout carries the stdio protocol.

use env_logger::{Builder, Env, Target};

/// Environment variable consulted before the verbosity flag
pub const LOG_ENV: &str = "DIRBRIDGE_LOG";
/// Consulted when `DIRBRIDGE_LOG` is unset
pub const FALLBACK_LOG_ENV: &str = "RUST_LOG";
const LOG_STYLE_ENV: &str = "DIRBRIDGE_LOG_STYLE";

/// `RUST_LOG` if set, else the level implied by `-v` flags
fn fallback_filter(rust_log: Option<String>, verbosity: u8) -> String {
    match rust_log {
        Some(filter) if !filter.trim().is_empty() => filter,
        _ => default_filter(verbosity).to_string(),
    }
}

fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global logger. Later calls are ignored.
pub fn init(verbosity: u8) {
    let env = Env::default()
        .filter_or(
            LOG_ENV,
            fallback_filter(std::env::var(FALLBACK_LOG_ENV).ok(), verbosity),
        )
        .write_style(LOG_STYLE_ENV);

    let _ = Builder::from_env(env)
        .target(Target::Stderr)
        .format_timestamp_millis()
        .try_init();
}
