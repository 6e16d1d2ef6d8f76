//! ZeroSSL REST API client
//!
//! Every call is a single request authenticated with the `access_key` query
//! parameter. The client never retries; callers decide what is transient.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::csr::CsrPem;
use super::domain::Domain;
use crate::error::TransportError;

/// Validation method used for CNAME challenges
pub const CNAME_CSR_HASH: &str = "CNAME_CSR_HASH";

/// The CNAME record the CA expects to resolve before validating
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationChallenge {
    pub cname_name: String,
    pub cname_value: String,
}

/// Result of creating a certificate request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequestResult {
    pub certificate_id: String,
    pub challenge: ValidationChallenge,
}

/// Answer to a validation submission
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationSubmission {
    /// Body carried a `status` and no `error`
    Status(String),
    /// Body carried an `error`; usually the CNAME is not resolvable yet
    Error(Value),
    /// Neither field present
    Unrecognized(Value),
}

impl ValidationSubmission {
    fn from_body(body: Value) -> Self {
        if let Some(error) = body.get("error") {
            return ValidationSubmission::Error(error.clone());
        }
        match body.get("status").and_then(Value::as_str) {
            Some(status) => ValidationSubmission::Status(status.to_string()),
            None => ValidationSubmission::Unrecognized(body),
        }
    }
}

/// `GET /certificates/{id}/status` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ValidationStatus {
    /// 0 while pending, 1 once issued. Kept raw so unexpected values surface.
    #[serde(default)]
    pub validation_completed: Value,
}

/// Lifecycle status as reported by the CA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    Draft,
    PendingValidation,
    Issued,
    #[serde(other)]
    Unknown,
}

impl CertificateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::Draft => "draft",
            CertificateStatus::PendingValidation => "pending_validation",
            CertificateStatus::Issued => "issued",
            CertificateStatus::Unknown => "unknown",
        }
    }
}

/// One row of `GET /certificates`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSummary {
    pub common_name: String,
    pub expires: String,
    pub status: CertificateStatus,
}

impl CertificateSummary {
    /// Parse the CA's `YYYY-MM-DD HH:MM:SS` (UTC) expiry
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.expires, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at().map(|expires| (expires - now).num_days())
    }
}

/// Certificate authority operations used by the orchestrator
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn submit_certificate_request(
        &self,
        domain: &Domain,
        csr: &CsrPem,
        validity_days: u32,
    ) -> Result<CertificateRequestResult, TransportError>;

    async fn submit_challenge_validation(
        &self,
        certificate_id: &str,
        method: &str,
    ) -> Result<ValidationSubmission, TransportError>;

    async fn get_validation_status(&self, certificate_id: &str) -> Result<ValidationStatus, TransportError>;

    async fn download_certificate(&self, certificate_id: &str) -> Result<Vec<u8>, TransportError>;

    async fn list_certificates(&self) -> Result<Vec<CertificateSummary>, TransportError>;
}

#[derive(Debug, Deserialize)]
struct CreateCertificateResponse {
    id: String,
    validation: ValidationDetails,
}

#[derive(Debug, Deserialize)]
struct ValidationDetails {
    other_methods: HashMap<String, OtherMethod>,
}

#[derive(Debug, Deserialize)]
struct OtherMethod {
    cname_validation_p1: String,
    cname_validation_p2: String,
}

#[derive(Debug, Deserialize)]
struct ListCertificatesResponse {
    results: Vec<CertificateSummary>,
}

#[derive(Clone)]
pub struct ZeroSslClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl std::fmt::Debug for ZeroSslClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeroSslClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<REDACTED>")
            .finish()
    }
}

impl ZeroSslClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| TransportError::Request {
                operation: "build http client",
                source,
            })?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and return the raw body of a 2xx response
    async fn send(&self, operation: &'static str, request: RequestBuilder) -> Result<Vec<u8>, TransportError> {
        let response = request
            .query(&[("access_key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|source| TransportError::Request { operation, source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                operation,
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| TransportError::Request { operation, source })?;
        Ok(body.to_vec())
    }

    async fn send_json(&self, operation: &'static str, request: RequestBuilder) -> Result<Value, TransportError> {
        let body = self.send(operation, request).await?;
        serde_json::from_slice(&body).map_err(|e| TransportError::Decode {
            operation,
            message: e.to_string(),
        })
    }
}

fn decode<T: serde::de::DeserializeOwned>(operation: &'static str, body: Value) -> Result<T, TransportError> {
    if let Some(error) = body.get("error") {
        return Err(TransportError::Rejected {
            operation,
            error: error.to_string(),
        });
    }
    serde_json::from_value(body).map_err(|e| TransportError::Decode {
        operation,
        message: e.to_string(),
    })
}

#[async_trait]
impl CertificateAuthority for ZeroSslClient {
    async fn submit_certificate_request(
        &self,
        domain: &Domain,
        csr: &CsrPem,
        validity_days: u32,
    ) -> Result<CertificateRequestResult, TransportError> {
        const OPERATION: &str = "create certificate";

        // ZeroSSL takes the PEM with line breaks removed
        let csr_single_line: String = csr.as_str().chars().filter(|c| *c != '\n' && *c != '\r').collect();
        let validity = validity_days.to_string();
        let form = [
            ("certificate_domains", domain.as_str()),
            ("certificate_validity_days", validity.as_str()),
            ("certificate_csr", csr_single_line.as_str()),
        ];

        info!("Requesting certificate for {} ({} days)", domain, validity_days);
        let body = self
            .send_json(OPERATION, self.client.post(self.url("/certificates")).form(&form))
            .await?;
        let created: CreateCertificateResponse = decode(OPERATION, body)?;

        let method = created
            .validation
            .other_methods
            .get(domain.as_str())
            .ok_or_else(|| TransportError::Decode {
                operation: OPERATION,
                message: format!("no CNAME validation details for {}", domain),
            })?;

        debug!("Certificate {} created for {}", created.id, domain);

        Ok(CertificateRequestResult {
            certificate_id: created.id,
            challenge: ValidationChallenge {
                cname_name: method.cname_validation_p1.clone(),
                cname_value: method.cname_validation_p2.clone(),
            },
        })
    }

    async fn submit_challenge_validation(
        &self,
        certificate_id: &str,
        method: &str,
    ) -> Result<ValidationSubmission, TransportError> {
        let url = self.url(&format!("/certificates/{}/challenges", certificate_id));
        let body = self
            .send_json(
                "submit validation",
                self.client.post(url).form(&[("validation_method", method)]),
            )
            .await?;
        Ok(ValidationSubmission::from_body(body))
    }

    async fn get_validation_status(&self, certificate_id: &str) -> Result<ValidationStatus, TransportError> {
        const OPERATION: &str = "validation status";

        let url = self.url(&format!("/certificates/{}/status", certificate_id));
        let body = self.send_json(OPERATION, self.client.get(url)).await?;
        serde_json::from_value(body).map_err(|e| TransportError::Decode {
            operation: OPERATION,
            message: e.to_string(),
        })
    }

    async fn download_certificate(&self, certificate_id: &str) -> Result<Vec<u8>, TransportError> {
        let url = self.url(&format!("/certificates/{}/download", certificate_id));
        self.send("download certificate", self.client.get(url)).await
    }

    async fn list_certificates(&self) -> Result<Vec<CertificateSummary>, TransportError> {
        const OPERATION: &str = "list certificates";

        let body = self.send_json(OPERATION, self.client.get(self.url("/certificates"))).await?;
        let listing: ListCertificatesResponse = decode(OPERATION, body)?;
        Ok(listing.results)
    }
}
