//! Telemetry helpers for structured logging.

/// Initialize tracing. Users can install their own subscriber; this
/// helper installs an env-filtered subscriber (falling back to `info`)
/// if none is set.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
