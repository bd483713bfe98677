//! Tracing/logging initialization shared by the `ridesync` binary and tests.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, Result};

/// Install the global tracing subscriber.
///
/// `default_filter` applies when `RUST_LOG` is unset; a bare level such as
/// `"debug"` is scoped to the `ridesync_*` crates so sqlx stays quiet.
/// `log_json` switches to structured JSON lines.
pub fn init_tracing(default_filter: &str, log_json: bool) -> Result<()> {
    let env_filter = match std::env::var("RUST_LOG") {
        Ok(filter) => EnvFilter::new(filter),
        Err(_) => EnvFilter::new(expand_level(default_filter)),
    };
    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|e| Error::Config(format!("tracing already initialised: {e}")))
}

fn expand_level(filter: &str) -> String {
    if filter.contains('=') || filter.contains(',') {
        return filter.to_string();
    }
    ["ridesync_core", "ridesync_store", "ridesync_engine", "ridesync"]
        .iter()
        .map(|target| format!("{target}={filter}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_level_is_scoped_to_workspace_crates() {
        let filter = expand_level("debug");
        assert!(filter.contains("ridesync_engine=debug"));
        assert!(!filter.contains("sqlx"));
    }

    #[test]
    fn explicit_directives_pass_through() {
        assert_eq!(expand_level("sqlx=warn,info"), "sqlx=warn,info");
    }
}
