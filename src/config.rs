use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "EUR";
const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_GATEWAY_BASE_URL: &str = "https://api-m.sandbox.paypal.com";

/// Payment gateway configuration (PayPal REST credentials and endpoints).
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// OAuth2 client id issued by the provider
    #[serde(default)]
    pub client_id: String,

    /// OAuth2 client secret issued by the provider
    #[serde(default)]
    pub client_secret: String,

    /// Provider API base URL; the default points at the sandbox environment
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,

    /// Where the provider redirects the shopper after approving payment
    #[serde(default = "default_return_url")]
    pub return_url: String,

    /// Where the provider redirects the shopper after cancelling
    #[serde(default = "default_cancel_url")]
    pub cancel_url: String,

    /// Upper bound for any single provider call, in seconds
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            base_url: default_gateway_base_url(),
            return_url: default_return_url(),
            cancel_url: default_cancel_url(),
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to bootstrap the database schema on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Public base URL used when building account action links in emails
    #[validate(url)]
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// ISO currency code used for cart totals and authorizations
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Password reset tokens expire this many minutes after issuance
    #[serde(default = "default_password_reset_ttl_minutes")]
    pub password_reset_ttl_minutes: i64,

    /// Email verification tokens expire this many hours after issuance
    #[serde(default = "default_email_verification_ttl_hours")]
    pub email_verification_ttl_hours: i64,

    /// Pending checkout sessions older than this are considered abandoned
    #[serde(default = "default_checkout_pending_ttl_minutes")]
    pub checkout_pending_ttl_minutes: i64,

    /// Payment gateway configuration
    #[serde(default)]
    #[validate]
    pub gateway: GatewayConfig,
}

impl AppConfig {
    /// Minimal configuration pointed at the given database, with defaults
    /// everywhere else. Used by tests and embedded deployments.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            public_base_url: default_public_base_url(),
            currency: default_currency(),
            password_reset_ttl_minutes: default_password_reset_ttl_minutes(),
            email_verification_ttl_hours: default_email_verification_ttl_hours(),
            checkout_pending_ttl_minutes: default_checkout_pending_ttl_minutes(),
            gateway: GatewayConfig::default(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
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

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_db_idle_timeout_secs() -> u64 {
    600
}

fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_public_base_url() -> String {
    DEFAULT_PUBLIC_BASE_URL.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_password_reset_ttl_minutes() -> i64 {
    30
}

fn default_email_verification_ttl_hours() -> i64 {
    24
}

fn default_checkout_pending_ttl_minutes() -> i64 {
    30
}

fn default_gateway_base_url() -> String {
    DEFAULT_GATEWAY_BASE_URL.to_string()
}

fn default_return_url() -> String {
    format!("{DEFAULT_PUBLIC_BASE_URL}/checkout/return")
}

fn default_cancel_url() -> String {
    format!("{DEFAULT_PUBLIC_BASE_URL}/checkout/cancel")
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

/// Loads configuration from layered sources.
///
/// Order of precedence (later wins): `config/default`, `config/{RUN_ENV}`,
/// then `APP__`-prefixed environment variables (`APP__GATEWAY__CLIENT_ID`
/// maps to `gateway.client_id`).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let settings = Config::builder()
        .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
        .add_source(File::with_name(&format!("{CONFIG_DIR}/{run_env}")).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let config: AppConfig = settings.try_deserialize()?;
    config
        .validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let cfg = AppConfig::new("sqlite::memory:");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.currency, "EUR");
        assert_eq!(cfg.password_reset_ttl_minutes, 30);
        assert_eq!(cfg.email_verification_ttl_hours, 24);
        assert!(cfg.gateway.base_url.contains("sandbox"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_database_url_fails_validation() {
        let cfg = AppConfig::new("");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn gateway_section_deserializes_with_partial_fields() {
        let cfg: GatewayConfig = serde_json::from_str(r#"{"client_id": "abc"}"#).unwrap();
        assert_eq!(cfg.client_id, "abc");
        assert_eq!(cfg.timeout_secs, 10);
        assert!(cfg.return_url.ends_with("/checkout/return"));
    }
}
