//! Application configuration loaded from environment variables.

use std::time::Duration;

use checkout::CheckoutConfig;
use common::Money;
use secrecy::SecretString;
use thiserror::Error;

/// Errors raised while reading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },
}

/// Server configuration.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL ledger; in-memory when unset
/// - `RAZORPAY_KEY_ID`, `RAZORPAY_SECRET` (required), `RAZORPAY_BASE_URL`
/// - `COURSE_SERVICE_URL`, `USER_SERVICE_URL`, `AUTH_SERVICE_URL`,
///   `NOTIFICATION_SERVICE_URL`: collaborator base URLs
/// - `SERVICE_TOKEN`: bearer token sent to collaborators
/// - `PAYMENT_CURRENCY` (default `INR`), `MIN_CHARGE_MINOR` (default `100`)
/// - `CALL_TIMEOUT_SECS` (default `30`), `MAX_CONCURRENT_ENROLLMENTS` (default `8`)
/// - `RECONCILE_INTERVAL_SECS` (default `60`, `0` disables),
///   `RECONCILE_MAX_ATTEMPTS` (default `5`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub razorpay_key_id: String,
    pub razorpay_secret: SecretString,
    pub razorpay_base_url: String,
    pub course_service_url: String,
    pub user_service_url: String,
    pub auth_service_url: String,
    pub notification_service_url: String,
    pub service_token: Option<SecretString>,
    pub currency: String,
    pub min_charge_minor: i64,
    pub call_timeout: Duration,
    pub max_concurrent_enrollments: usize,
    pub reconcile_interval: Option<Duration>,
    pub reconcile_max_attempts: u32,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let url = |key: &str, default: &str| {
            get(key)
                .unwrap_or_else(|| default.to_string())
                .trim_end_matches('/')
                .to_string()
        };
        let defaults = Self::default();

        let reconcile_secs: u64 = parse(&get, "RECONCILE_INTERVAL_SECS", 60)?;

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse(&get, "PORT", defaults.port)?,
            log_level: get("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: get("DATABASE_URL"),
            razorpay_key_id: get("RAZORPAY_KEY_ID").unwrap_or_default(),
            razorpay_secret: get("RAZORPAY_SECRET")
                .map(SecretString::new)
                .ok_or(ConfigError::Missing("RAZORPAY_SECRET"))?,
            razorpay_base_url: url("RAZORPAY_BASE_URL", &defaults.razorpay_base_url),
            course_service_url: url("COURSE_SERVICE_URL", &defaults.course_service_url),
            user_service_url: url("USER_SERVICE_URL", &defaults.user_service_url),
            auth_service_url: url("AUTH_SERVICE_URL", &defaults.auth_service_url),
            notification_service_url: url(
                "NOTIFICATION_SERVICE_URL",
                &defaults.notification_service_url,
            ),
            service_token: get("SERVICE_TOKEN").map(SecretString::new),
            currency: get("PAYMENT_CURRENCY").unwrap_or(defaults.currency),
            min_charge_minor: parse(&get, "MIN_CHARGE_MINOR", defaults.min_charge_minor)?,
            call_timeout: Duration::from_secs(parse(&get, "CALL_TIMEOUT_SECS", 30)?),
            max_concurrent_enrollments: parse(
                &get,
                "MAX_CONCURRENT_ENROLLMENTS",
                defaults.max_concurrent_enrollments,
            )?,
            reconcile_interval: (reconcile_secs > 0).then(|| Duration::from_secs(reconcile_secs)),
            reconcile_max_attempts: parse(
                &get,
                "RECONCILE_MAX_ATTEMPTS",
                defaults.reconcile_max_attempts,
            )?,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the checkout configuration handed to the orchestrator.
    pub fn checkout(&self) -> CheckoutConfig {
        let mut config = CheckoutConfig::new(String::new())
            .with_currency(self.currency.clone())
            .with_min_charge(Money::from_minor(self.min_charge_minor))
            .with_call_timeout(self.call_timeout)
            .with_max_concurrent_enrollments(self.max_concurrent_enrollments);
        config.signing_secret = self.razorpay_secret.clone();
        config.reconcile_max_attempts = self.reconcile_max_attempts.max(1);
        config
    }
}

fn parse<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            razorpay_key_id: String::new(),
            razorpay_secret: SecretString::new(String::new()),
            razorpay_base_url: "https://api.razorpay.com".to_string(),
            course_service_url: "http://localhost:4001".to_string(),
            user_service_url: "http://localhost:4002".to_string(),
            auth_service_url: "http://localhost:4000".to_string(),
            notification_service_url: "http://localhost:4003".to_string(),
            service_token: None,
            currency: "INR".to_string(),
            min_charge_minor: 100,
            call_timeout: Duration::from_secs(30),
            max_concurrent_enrollments: 8,
            reconcile_interval: Some(Duration::from_secs(60)),
            reconcile_max_attempts: 5,
        }
    }
}
