use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Initialize structured logging. `CONFAB_LOG` overrides the default level.
pub fn init() {
    let filter = EnvFilter::try_from_env("CONFAB_LOG")
        .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::INFO.into()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
