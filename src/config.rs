use chrono::NaiveDate;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_KHALTI_BASE_URL: &str = "https://dev.khalti.com/api/v2";
const DEFAULT_CBMS_BASE_URL: &str = "https://cbapi.ird.gov.np";

/// Khalti ePayment gateway settings
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KhaltiConfig {
    /// API root, e.g. `https://khalti.com/api/v2` in production
    #[serde(default = "default_khalti_base_url")]
    pub base_url: String,

    /// Live or test secret key; Khalti is disabled when absent
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Where Khalti redirects the guest after payment
    #[serde(default)]
    pub return_url: Option<String>,

    /// Public website of the merchant
    #[serde(default)]
    pub website_url: Option<String>,
}

impl Default for KhaltiConfig {
    fn default() -> Self {
        Self {
            base_url: default_khalti_base_url(),
            secret_key: None,
            return_url: None,
            website_url: None,
        }
    }
}

impl KhaltiConfig {
    pub fn is_enabled(&self) -> bool {
        self.secret_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }
}

/// IRD Central Billing Monitoring System credentials
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CbmsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_cbms_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_cbms_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CbmsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_cbms_base_url(),
            username: None,
            password: None,
            timeout_secs: default_cbms_timeout_secs(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret key (minimum 64 characters)
    #[validate(length(min = 64), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// JWT expiration time in seconds
    pub jwt_expiration: usize,

    /// JWT issuer name
    #[serde(default = "default_auth_issuer")]
    pub auth_issuer: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// CORS: allow credentials
    #[serde(default)]
    pub cors_allow_credentials: bool,

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

    /// Upper bound for a single HTTP request (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Secret used to derive table QR tokens
    #[validate(length(min = 32))]
    pub qr_signing_secret: String,

    /// Public origin used when building guest QR links
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// First AD month of the Nepali fiscal year (Shrawan 1)
    #[serde(default = "default_fiscal_year_start_month")]
    pub fiscal_year_start_month: u32,

    /// First AD day of the Nepali fiscal year
    #[serde(default = "default_fiscal_year_start_day")]
    pub fiscal_year_start_day: u32,

    /// VAT rate applied to new restaurants (0.13 = 13%)
    #[serde(default = "default_vat_rate")]
    #[validate(custom = "validate_rate")]
    pub default_vat_rate: Decimal,

    /// Service charge rate applied to new restaurants
    #[serde(default = "default_service_charge_rate")]
    #[validate(custom = "validate_rate")]
    pub default_service_charge_rate: Decimal,

    /// Khalti gateway configuration
    #[serde(default)]
    pub khalti: KhaltiConfig,

    /// CBMS integration configuration
    #[serde(default)]
    pub cbms: CbmsConfig,

    /// Platform admin created on first start when no admin exists
    #[serde(default)]
    #[validate(email)]
    pub bootstrap_admin_email: Option<String>,

    #[serde(default)]
    #[validate(length(min = 12))]
    pub bootstrap_admin_password: Option<String>,
}

impl AppConfig {
    /// Creates a new configuration with defaults for everything else
    pub fn new(
        database_url: String,
        jwt_secret: String,
        jwt_expiration: usize,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret: jwt_secret.clone(),
            jwt_expiration,
            auth_issuer: default_auth_issuer(),
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            qr_signing_secret: jwt_secret,
            public_base_url: default_public_base_url(),
            fiscal_year_start_month: default_fiscal_year_start_month(),
            fiscal_year_start_day: default_fiscal_year_start_day(),
            default_vat_rate: default_vat_rate(),
            default_service_charge_rate: default_service_charge_rate(),
            khalti: KhaltiConfig::default(),
            cbms: CbmsConfig::default(),
            bootstrap_admin_email: None,
            bootstrap_admin_password: None,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        matches!(
            self.environment.to_ascii_lowercase().as_str(),
            "development" | "dev" | "local" | "test"
        )
    }

    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_deref()
            .map(|raw| raw.split(',').any(|o| !o.trim().is_empty()))
            .unwrap_or(false)
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.cors_allow_any_origin || self.is_development()
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development() && !self.has_cors_allowed_origins() && !self.cors_allow_any_origin
        {
            let mut err = ValidationError::new("cors_allowed_origins");
            err.message = Some(
                "cors_allowed_origins must be set outside development (or set cors_allow_any_origin=true)"
                    .into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if NaiveDate::from_ymd_opt(
            2001,
            self.fiscal_year_start_month,
            self.fiscal_year_start_day,
        )
        .is_none()
        {
            let mut err = ValidationError::new("fiscal_year_start");
            err.message = Some("fiscal_year_start_month/day do not form a valid date".into());
            errors.add("fiscal_year_start_month", err);
        }

        if self.cbms.enabled && (self.cbms.username.is_none() || self.cbms.password.is_none()) {
            let mut err = ValidationError::new("cbms");
            err.message = Some("cbms.username and cbms.password are required when CBMS is enabled".into());
            errors.add("cbms", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] ConfigError),
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_auth_issuer() -> String {
    "restro-api".to_string()
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

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_fiscal_year_start_month() -> u32 {
    7
}

fn default_fiscal_year_start_day() -> u32 {
    16
}

fn default_vat_rate() -> Decimal {
    dec!(0.13)
}

fn default_service_charge_rate() -> Decimal {
    dec!(0.10)
}

fn default_khalti_base_url() -> String {
    DEFAULT_KHALTI_BASE_URL.to_string()
}

fn default_cbms_base_url() -> String {
    DEFAULT_CBMS_BASE_URL.to_string()
}

fn default_cbms_timeout_secs() -> u64 {
    15
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    if trimmed.len() < 64 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must be at least 64 characters for adequate security".into());
        return Err(err);
    }

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some("JWT secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    let lower = trimmed.to_ascii_lowercase();
    let weak_fragments = ["changeme", "password", "default", "12345", "abcdef"];
    if weak_fragments.iter().any(|pattern| lower.contains(pattern)) {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some(
            "JWT secret appears to be weak; use a cryptographically strong random string".into(),
        );
        return Err(err);
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must have at least 10 unique characters for adequate entropy".into());
        return Err(err);
    }

    Ok(())
}

fn validate_rate(rate: &Decimal) -> Result<(), ValidationError> {
    if rate.is_sign_negative() || *rate > Decimal::ONE {
        let mut err = ValidationError::new("rate");
        err.message = Some("rates must be between 0.0 and 1.0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("restro_api={},tower_http=debug,sqlx=warn", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
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

    // jwt_secret and qr_signing_secret have no default on purpose
    let config = Config::builder()
        .set_default("database_url", "sqlite://restro.db?mode=rwc")?
        .set_default("jwt_expiration", 43_200)?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    for required in ["jwt_secret", "qr_signing_secret"] {
        if config.get_string(required).is_err() {
            error!(
                "{} is not configured. Set APP__{} to a secure random string.",
                required,
                required.to_ascii_uppercase()
            );
            return Err(AppConfigError::Load(ConfigError::NotFound(format!(
                "{} is required but not configured",
                required
            ))));
        }
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
