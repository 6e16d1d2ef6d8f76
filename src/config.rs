use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigurationError;
use crate::issuance::csr::{IdentityProfile, DEFAULT_KEY_SIZE_BITS, MIN_KEY_SIZE_BITS};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub zerossl: ZeroSslConfig,
    #[serde(default)]
    pub route53: Route53Config,
    #[serde(default)]
    pub certificate: CertificateConfig,
    #[serde(default)]
    pub issuance: IssuanceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ZeroSslConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_validity_days")]
    pub validity_days: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_base_url() -> String { "https://api.zerossl.com".to_string() }
fn default_validity_days() -> u32 { 90 }
fn default_request_timeout() -> u64 { 30 }

impl Default for ZeroSslConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            validity_days: default_validity_days(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Route53Config {
    #[serde(default = "default_hosted_zone_id")]
    pub hosted_zone_id: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_ttl")]
    pub ttl_secs: i64,
}

fn default_hosted_zone_id() -> String { "/hostedzone/Z31X3CKBZG9JSR".to_string() }
fn default_region() -> String { "us-east-1".to_string() }
fn default_ttl() -> i64 { 300 }

impl Default for Route53Config {
    fn default() -> Self {
        Self {
            hosted_zone_id: default_hosted_zone_id(),
            region: default_region(),
            ttl_secs: default_ttl(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CertificateConfig {
    #[serde(default = "default_cert_dir")]
    pub cert_dir: String,
    #[serde(default = "default_key_size")]
    pub key_size_bits: u32,
    #[serde(default)]
    pub identity: IdentityProfile,
}

fn default_cert_dir() -> String { "cert".to_string() }
fn default_key_size() -> u32 { DEFAULT_KEY_SIZE_BITS }

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            cert_dir: default_cert_dir(),
            key_size_bits: default_key_size(),
            identity: IdentityProfile::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IssuanceConfig {
    /// Pause between submitting the request and the first validation attempt
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,
    #[serde(default = "default_validation_attempts")]
    pub validation_max_attempts: u32,
    #[serde(default = "default_issuance_attempts")]
    pub issuance_max_attempts: u32,
}

fn default_settle_delay() -> u64 { 15 }
fn default_validation_attempts() -> u32 { 5 }
fn default_issuance_attempts() -> u32 { 20 }

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            settle_delay_secs: default_settle_delay(),
            validation_max_attempts: default_validation_attempts(),
            issuance_max_attempts: default_issuance_attempts(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_output")]
    pub output: String,
    #[serde(default)]
    pub file_path: Option<String>,
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
fn default_log_output() -> String { "console".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            output: default_log_output(),
            file_path: None,
        }
    }
}

/// Credentials read from the environment, never from the config file
#[derive(Clone)]
pub struct Secrets {
    pub zerossl_api_key: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("zerossl_api_key", &"<REDACTED>")
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field("aws_secret_access_key", &"<REDACTED>")
            .finish()
    }
}

pub const ZEROSSL_API_KEY_VAR: &str = "ZEROSSL_API_KEY";
pub const AWS_ACCESS_KEY_ID_VAR: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";

impl Secrets {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve secrets through an arbitrary lookup. Empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigurationError::MissingEnv(name))
        };

        Ok(Self {
            zerossl_api_key: require(ZEROSSL_API_KEY_VAR)?,
            aws_access_key_id: require(AWS_ACCESS_KEY_ID_VAR)?,
            aws_secret_access_key: require(AWS_SECRET_ACCESS_KEY_VAR)?,
        })
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigurationError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

/// Load the config file if it exists, otherwise fall back to defaults
pub fn load_config_or_default(path: impl AsRef<Path>) -> Result<Config, ConfigurationError> {
    let path = path.as_ref();
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigurationError> {
    let invalid = |msg: String| -> Result<(), ConfigurationError> {
        Err(ConfigurationError::Invalid(msg))
    };

    if config.zerossl.api_base_url.trim().is_empty() {
        return invalid("zerossl.api_base_url must not be empty".to_string());
    }
    if config.zerossl.validity_days == 0 {
        return invalid("zerossl.validity_days must be greater than zero".to_string());
    }
    if config.route53.hosted_zone_id.trim().is_empty() {
        return invalid("route53.hosted_zone_id must not be empty".to_string());
    }
    if config.route53.ttl_secs <= 0 {
        return invalid(format!("route53.ttl_secs must be positive, got {}", config.route53.ttl_secs));
    }
    if config.certificate.key_size_bits < MIN_KEY_SIZE_BITS {
        return invalid(format!(
            "certificate.key_size_bits must be at least {}, got {}",
            MIN_KEY_SIZE_BITS, config.certificate.key_size_bits
        ));
    }
    if config.issuance.validation_max_attempts == 0 || config.issuance.issuance_max_attempts == 0 {
        return invalid("issuance attempt budgets must be greater than zero".to_string());
    }
    if !matches!(config.logging.output.as_str(), "console" | "file") {
        return invalid(format!("logging.output must be \"console\" or \"file\", got {:?}", config.logging.output));
    }

    Ok(())
}
