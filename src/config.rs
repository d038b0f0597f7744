use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

const DEFAULT_ORDER_NUMBER_ATTEMPTS: u32 = 5;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_FEDERATION_MAX_RETRIES: u32 = 5;
const DEFAULT_FEDERATION_RETRY_DELAY_SECS: u64 = 2;

/// What checkout does when a coupon code fails validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidCouponPolicy {
    /// Fail the whole checkout with 422 and the rejection reason.
    Reject,
    /// Proceed with zero discount and log a warning.
    Ignore,
}

impl Default for InvalidCouponPolicy {
    fn default() -> Self {
        Self::Reject
    }
}

/// Checkout behavior knobs.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CheckoutConfig {
    #[serde(default)]
    pub invalid_coupon_policy: InvalidCouponPolicy,

    /// Attempts at generating a unique order number before giving up.
    #[serde(default = "default_order_number_attempts")]
    #[validate(range(min = 1, max = 100))]
    pub order_number_attempts: u32,

    /// Bound on each external pricing (tax/shipping) call.
    #[serde(default = "default_pricing_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub pricing_timeout_secs: u64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            invalid_coupon_policy: InvalidCouponPolicy::default(),
            order_number_attempts: default_order_number_attempts(),
            pricing_timeout_secs: default_pricing_timeout_secs(),
        }
    }
}

/// Cross-service federation settings for the admin read paths.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct FederationConfig {
    /// Disable the bootstrap entirely (e.g. when running against SQLite).
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_federation_max_retries")]
    #[validate(range(min = 1, max = 20))]
    pub max_retries: u32,

    /// Initial delay between bootstrap attempts; doubles on each retry.
    #[serde(default = "default_federation_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Foreign server names expected to be importable, comma separated.
    #[serde(default)]
    pub foreign_servers: Option<String>,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: default_federation_max_retries(),
            retry_delay_secs: default_federation_retry_delay_secs(),
            foreign_servers: None,
        }
    }
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Bounded event channel capacity
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[serde(default)]
    #[validate]
    pub checkout: CheckoutConfig,

    #[serde(default)]
    #[validate]
    pub federation: FederationConfig,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn default_order_number_attempts() -> u32 {
    DEFAULT_ORDER_NUMBER_ATTEMPTS
}

fn default_pricing_timeout_secs() -> u64 {
    5
}

fn default_federation_max_retries() -> u32 {
    DEFAULT_FEDERATION_MAX_RETRIES
}

fn default_federation_retry_delay_secs() -> u64 {
    DEFAULT_FEDERATION_RETRY_DELAY_SECS
}

/// Installs the global tracing subscriber. `RUST_LOG` overrides the
/// configured level.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("marketplace_api={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);
    let filter = EnvFilter::new(filter_directive);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Loads configuration from config/ files layered under `APP__*` environment
/// variables. `RUN_ENV` (or `APP_ENV`) selects the profile.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://marketplace.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_defaults_reject_invalid_coupons() {
        let cfg = CheckoutConfig::default();
        assert_eq!(cfg.invalid_coupon_policy, InvalidCouponPolicy::Reject);
        assert_eq!(cfg.order_number_attempts, DEFAULT_ORDER_NUMBER_ATTEMPTS);
    }

    #[test]
    fn federation_disabled_by_default() {
        let cfg = FederationConfig::default();
        assert!(!cfg.enabled);
        assert_eq!(cfg.max_retries, DEFAULT_FEDERATION_MAX_RETRIES);
        assert_eq!(cfg.retry_delay_secs, DEFAULT_FEDERATION_RETRY_DELAY_SECS);
    }

    #[test]
    fn invalid_coupon_policy_parses_from_snake_case() {
        let policy: InvalidCouponPolicy = serde_json::from_str("\"ignore\"").unwrap();
        assert_eq!(policy, InvalidCouponPolicy::Ignore);
    }
}
