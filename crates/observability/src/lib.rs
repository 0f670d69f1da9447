//! Process-wide tracing setup shared by the ledger binaries.

/// Initialize process-wide observability with settings from the environment.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(&tracing::TracingConfig::from_env());
}

/// Tracing configuration (filters, output format).
pub mod tracing;
