//! Log output for the rollcall binaries.
//!
//! Everything goes to stderr so `rollcall roll` can keep stdout for results.

use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG`, or `fallback` when the variable is unset or unparsable.
pub fn filter_or(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install the process-wide stderr subscriber.
///
/// Only the first call in a process installs anything.
pub fn init_subscriber(level: &str) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter_or(level))
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .try_init();
    if installed.is_err() {
        tracing::trace!("log subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_subscriber("warn");
        init_subscriber("debug");
    }

    #[test]
    fn fallback_directive_is_kept() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert_eq!(filter_or("rollcall=debug").to_string(), "rollcall=debug");
        }
    }
}
