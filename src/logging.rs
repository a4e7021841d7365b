//! Tracing subscriber setup

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `filter` when set. Safe to call more than once: later
/// calls leave the first subscriber in place and return `false`.
pub fn init_tracing(filter: &str, json: bool) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).try_init()
    };
    installed.is_ok()
}

/// Install the global subscriber with the configured filter and format
pub fn init_from_config(config: &Config) -> bool {
    init_tracing(&config.log_filter, config.log_json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_a_no_op() {
        init_tracing("repokit=debug", false);
        assert!(!init_tracing("repokit=debug", true));
    }
}
