use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize the logging system
///
/// Installs a formatting subscriber filtered by `RUST_LOG`. Safe to call
/// more than once; only the first call installs anything.
pub fn init_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    });
}
