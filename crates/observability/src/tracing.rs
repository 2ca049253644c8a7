//! Subscriber construction.
//!
//! Output is one JSON object per event. Ledger spans carry `tenant_id` and the
//! entity ids, so filtering on a tenant is a `jq` away.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info";

/// Install the subscriber with `RUST_LOG`, falling back to `default_filter`.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    #[test]
    fn second_init_is_harmless() {
        super::init("debug");
        assert!(!super::init("debug"));
    }
}
