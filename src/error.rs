//! Error types for certificate issuance

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Terminal failure of an issuance run.
///
/// Every variant ends the run; the only conditions the orchestrator retries
/// on are the CA's transient validation `error` field and an incomplete
/// issuance status, neither of which surfaces here unless the retry budget
/// runs out.
#[derive(Debug, Error)]
pub enum IssuanceError {
    /// Missing credential, bad domain, or invalid settings
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Key or CSR generation failed
    #[error("Key/CSR generation failed: {0}")]
    Crypto(#[from] CryptoError),

    /// CA API call failed at the transport or decoding level
    #[error("Certificate authority request failed: {0}")]
    Transport(#[from] TransportError),

    /// DNS record could not be provisioned
    #[error("DNS provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    /// CA answered a validation submission with an unexpected shape
    #[error("Unexpected validation response from certificate authority: {response}")]
    Validation { response: String },

    /// Validation submission never reached `pending_validation`
    #[error("Challenge validation not accepted after {attempts} attempts (last response: {})", .last_response.as_deref().unwrap_or("none"))]
    ValidationTimeout {
        attempts: u32,
        last_response: Option<String>,
    },

    /// Certificate was not issued within the polling budget
    #[error("Certificate not issued after {attempts} status checks (last validation_completed: {})", .last_observed.as_deref().unwrap_or("none"))]
    IssuanceTimeout {
        attempts: u32,
        last_observed: Option<String>,
    },

    /// Run was cancelled before reaching a terminal state
    #[error("Issuance cancelled")]
    Cancelled,

    /// Persisting or reading an artifact failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("{0} environment variable is not set")]
    MissingEnv(&'static str),

    #[error("Invalid domain: {0:?}")]
    InvalidDomain(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Key pair or CSR generation failure
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key size {0} bits is below the 2048-bit minimum")]
    KeySizeTooSmall(u32),

    #[error("Cannot generate a CSR for an empty domain")]
    EmptyDomain,

    #[error("RSA key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Failed to encode key: {0}")]
    Encoding(String),

    #[error("Failed to sign CSR: {0}")]
    Signing(#[from] rcgen::Error),

    #[error("Failed to parse CSR: {0}")]
    CsrParse(String),

    #[error("CSR public key does not match the generated private key")]
    PublicKeyMismatch,

    #[error("Key generation task failed: {0}")]
    Task(String),
}

/// CA REST API failure. Never retried by the client itself.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{operation}: request failed: {source}")]
    Request {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation}: HTTP {status}: {body}")]
    Http {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("{operation}: malformed response: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },

    #[error("{operation}: rejected by certificate authority: {error}")]
    Rejected {
        operation: &'static str,
        error: String,
    },
}

/// DNS provider failure
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Authentication with DNS provider failed: {0}")]
    Authentication(String),

    #[error("Hosted zone '{zone_id}' not found")]
    ZoneNotFound { zone_id: String },

    #[error("Invalid record change: {0}")]
    InvalidChange(String),

    #[error("DNS provider API error: {0}")]
    Api(String),
}

/// Filesystem failure while persisting artifacts
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Refusing to overwrite existing artifact {path}")]
    AlreadyExists { path: PathBuf },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::AlreadyExists {
            StorageError::AlreadyExists { path: path.into() }
        } else {
            StorageError::Io {
                path: path.into(),
                source,
            }
        }
    }
}
