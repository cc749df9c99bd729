use sentry;
use sentry::internals::ClientInitGuard;

#[derive(Debug, Deserialize, Clone)]
pub struct SentryConfig {
    pub dsn: String,
}

/// Installs the sentry client and panic handler. The guard must be kept alive
/// for events to be flushed.
pub fn init(sentry_config: Option<&SentryConfig>) -> Option<ClientInitGuard> {
    sentry_config.map(|config| {
        info!("Initializing sentry integration");
        let guard = sentry::init((config.dsn.clone(), sentry::ClientOptions::default()));
        sentry::integrations::panic::register_panic_handler();
        guard
    })
}
