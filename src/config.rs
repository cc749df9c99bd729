//! Config module contains the top-level config for the app.

use std::env;

use config_crate::{Config as RawConfig, ConfigError, Environment, File};

use http::client::Config as HttpClientConfig;
use sentry_integration::SentryConfig;

/// Basic settings - HTTP binding, gateway credentials, collaborators and background jobs
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: Server,
    pub client: HttpClientConfig,
    pub gateway: Gateway,
    pub services: Services,
    pub auth: Auth,
    pub scheduler: Scheduler,
    pub event_store: EventStore,
    pub sentry: Option<SentryConfig>,
}

/// Common server settings
#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    pub host: String,
    pub port: String,
    pub database: String,
    pub thread_count: usize,
}

/// Payment gateway endpoint and credentials
#[derive(Debug, Deserialize, Clone)]
pub struct Gateway {
    pub url: String,
    pub shop_id: String,
    pub secret_key: String,
    pub agent_id: String,
    pub payout_api_key: String,
    pub return_url: String,
    /// Re-fetch webhook objects from the gateway before acting on them
    pub verify_webhooks: bool,
}

/// Urls of the user and notification services
#[derive(Debug, Deserialize, Clone)]
pub struct Services {
    pub users_url: String,
    pub notifications_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Auth {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Scheduler {
    /// Local time of the daily jobs, `HH:MM`
    pub daily_at: String,
    pub sweep_interval_s: u64,
    pub sweep_batch_size: i64,
    /// Expired projects read per page; the daily job goes through all of them
    pub expired_page_size: i64,
    pub events_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventStore {
    /// Events taken per poll
    pub batch_size: u32,
    pub max_processing_attempts: u32,
    pub stuck_threshold_sec: u32,
}

/// Creates new app config struct
/// #Examples
/// ```no_run
/// use treasury_lib::config::*;
///
/// let config = Config::new();
/// ```
impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        let mut s = RawConfig::new();
        s.merge(File::with_name("config/base"))?;

        // Note that this file is _optional_
        let env = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        s.merge(File::with_name(&format!("config/{}", env)).required(false))?;

        // Add in settings from the environment (with a prefix of TREASURY), e.g. TREASURY_SERVER__DATABASE
        s.merge(Environment::with_prefix("TREASURY").separator("__"))?;

        let config: Config = s.try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Credentials and secrets have empty defaults in `config/base.toml`, so a deployment
    /// that forgot to provide them is refused at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("gateway.shop_id", &self.gateway.shop_id),
            ("gateway.secret_key", &self.gateway.secret_key),
            ("gateway.agent_id", &self.gateway.agent_id),
            ("gateway.payout_api_key", &self.gateway.payout_api_key),
            ("auth.jwt_secret", &self.auth.jwt_secret),
        ];

        for (key, value) in required.iter() {
            if value.trim().is_empty() {
                return Err(ConfigError::NotFound(key.to_string()));
            }
        }

        Ok(())
    }
}
