//! Logging setup.

use tracing_subscriber::EnvFilter;

/// Initialize tracing with an env-filter (`RUST_LOG`), defaulting to `info`
/// for this crate. Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("intrachat_client=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
