//! Process-wide logging setup shared by the API binary and tests.

pub mod tracing;

/// Install the JSON `tracing` subscriber. Repeated calls are no-ops.
pub fn init() {
    tracing::init(tracing::DEFAULT_FILTER);
}
