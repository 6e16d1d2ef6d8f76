//! End-to-end certificate issuance.
//!
//! The run is a chain of typed states. Each step consumes the value produced
//! by the previous one, so steps cannot be called out of order:
//!
//! ```text
//! Init -> CsrGenerated -> RequestSubmitted -> DnsProvisioned
//!      -> ValidationConfirmed -> Downloaded
//! ```
//!
//! Any step may end the run with an [`IssuanceError`] instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::{BackoffPolicy, Sleeper, TokioSleeper};
use super::csr::{CsrPem, IdentityProfile, KeyGenerator, DEFAULT_KEY_SIZE_BITS};
use super::dns_provider::{DnsProvider, CHALLENGE_RECORD_TTL_SECS};
use super::domain::Domain;
use super::storage::ArtifactStore;
use super::zerossl::{CertificateAuthority, ValidationChallenge, ValidationSubmission, CNAME_CSR_HASH};
use crate::config::Config;
use crate::error::{IssuanceError, TransportError};

/// CA status that confirms a validation submission was accepted
pub const PENDING_VALIDATION: &str = "pending_validation";

/// Named phases, used for logging transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    CsrGenerated,
    RequestSubmitted,
    DnsProvisioned,
    ValidationPending,
    ValidationConfirmed,
    Downloaded,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::CsrGenerated => "csr_generated",
            Phase::RequestSubmitted => "request_submitted",
            Phase::DnsProvisioned => "dns_provisioned",
            Phase::ValidationPending => "validation_pending",
            Phase::ValidationConfirmed => "validation_confirmed",
            Phase::Downloaded => "downloaded",
        };
        f.write_str(name)
    }
}

/// A certificate request as registered with the CA. Persisted after
/// submission so a restarted run never creates a second CA-side record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub certificate_id: String,
    pub domain: Domain,
    pub validity_days: u32,
    pub csr: CsrPem,
    pub challenge: ValidationChallenge,
}

#[derive(Debug)]
pub struct CsrGenerated {
    domain: Domain,
    csr: CsrPem,
}

impl CsrGenerated {
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn csr(&self) -> &CsrPem {
        &self.csr
    }
}

#[derive(Debug)]
pub struct RequestSubmitted {
    request: CertificateRequest,
    resumed: bool,
}

impl RequestSubmitted {
    pub fn request(&self) -> &CertificateRequest {
        &self.request
    }

    /// True when the request was loaded from storage instead of submitted
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }
}

#[derive(Debug)]
pub struct DnsProvisioned {
    request: CertificateRequest,
}

impl DnsProvisioned {
    pub fn request(&self) -> &CertificateRequest {
        &self.request
    }
}

#[derive(Debug)]
pub struct ValidationConfirmed {
    request: CertificateRequest,
    attempts: u32,
}

impl ValidationConfirmed {
    pub fn request(&self) -> &CertificateRequest {
        &self.request
    }

    /// Validation submissions made before the CA accepted one. Zero when
    /// an earlier run already had validation confirmed.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Terminal success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub domain: Domain,
    pub certificate_id: Option<String>,
    pub bundle_path: PathBuf,
}

/// Run parameters, normally derived from [`Config`]
#[derive(Debug, Clone)]
pub struct IssuanceSettings {
    pub hosted_zone_id: String,
    pub ttl_secs: i64,
    pub validity_days: u32,
    pub key_size_bits: u32,
    pub identity: IdentityProfile,
    pub settle_delay: Duration,
    pub validation_backoff: BackoffPolicy,
    pub issuance_backoff: BackoffPolicy,
}

impl IssuanceSettings {
    pub fn new(hosted_zone_id: impl Into<String>) -> Self {
        Self {
            hosted_zone_id: hosted_zone_id.into(),
            ttl_secs: CHALLENGE_RECORD_TTL_SECS,
            validity_days: 90,
            key_size_bits: DEFAULT_KEY_SIZE_BITS,
            identity: IdentityProfile::default(),
            settle_delay: Duration::from_secs(15),
            validation_backoff: BackoffPolicy::exponential(5),
            issuance_backoff: BackoffPolicy::exponential(20),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            hosted_zone_id: config.route53.hosted_zone_id.clone(),
            ttl_secs: config.route53.ttl_secs,
            validity_days: config.zerossl.validity_days,
            key_size_bits: config.certificate.key_size_bits,
            identity: config.certificate.identity.clone(),
            settle_delay: Duration::from_secs(config.issuance.settle_delay_secs),
            validation_backoff: BackoffPolicy::exponential(config.issuance.validation_max_attempts),
            issuance_backoff: BackoffPolicy::exponential(config.issuance.issuance_max_attempts),
        }
    }
}

enum ResumePoint {
    Unvalidated(RequestSubmitted),
    Validated(ValidationConfirmed),
}

pub struct IssuanceOrchestrator {
    ca: Arc<dyn CertificateAuthority>,
    dns: Arc<dyn DnsProvider>,
    generator: Arc<dyn KeyGenerator>,
    sleeper: Arc<dyn Sleeper>,
    store: ArtifactStore,
    settings: IssuanceSettings,
    cancel: CancellationToken,
}

impl IssuanceOrchestrator {
    pub fn new(
        ca: Arc<dyn CertificateAuthority>,
        dns: Arc<dyn DnsProvider>,
        generator: Arc<dyn KeyGenerator>,
        store: ArtifactStore,
        settings: IssuanceSettings,
    ) -> Self {
        Self {
            ca,
            dns,
            generator,
            sleeper: Arc::new(TokioSleeper),
            store,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Drive a domain from scratch (or from a persisted request) to a
    /// downloaded bundle.
    pub async fn run(&self, domain: Domain) -> Result<Downloaded, IssuanceError> {
        info!(domain = %domain, "Starting certificate issuance");

        if let Some(bundle_path) = self.store.existing_bundle(&domain)? {
            info!(domain = %domain, "Certificate bundle already present at {}", bundle_path.display());
            return Ok(Downloaded {
                domain,
                certificate_id: None,
                bundle_path,
            });
        }

        let submitted = match self.store.load_request(&domain)? {
            Some(request) => {
                info!(
                    domain = %domain,
                    certificate_id = %request.certificate_id,
                    "Resuming persisted certificate request"
                );
                RequestSubmitted {
                    request,
                    resumed: true,
                }
            }
            None => {
                let generated = self.generate_csr(domain).await?;
                self.submit_request(generated).await?
            }
        };

        let confirmed = match self.resume_point(submitted).await? {
            ResumePoint::Validated(confirmed) => confirmed,
            ResumePoint::Unvalidated(submitted) => {
                let provisioned = self.provision_dns(submitted).await?;
                self.confirm_validation(provisioned).await?
            }
        };
        self.download(confirmed).await
    }

    /// Decide where a persisted request picks up. The CA does not answer a
    /// second validation submission with `pending_validation`, so a request
    /// it already accepted must go straight to status polling.
    async fn resume_point(&self, submitted: RequestSubmitted) -> Result<ResumePoint, IssuanceError> {
        if !submitted.is_resumed() {
            return Ok(ResumePoint::Unvalidated(submitted));
        }
        let request = submitted.request;

        if self.store.is_validated(&request.domain) {
            info!(
                domain = %request.domain,
                certificate_id = %request.certificate_id,
                "Validation was confirmed by an earlier run, resuming status polling"
            );
            return Ok(ResumePoint::Validated(ValidationConfirmed { request, attempts: 0 }));
        }

        // Covers a run that stopped after the CA accepted validation but
        // before the marker was written
        self.checkpoint()?;
        let status = self.ca.get_validation_status(&request.certificate_id).await?;
        if status.validation_completed.as_i64() == Some(1) {
            info!(
                domain = %request.domain,
                certificate_id = %request.certificate_id,
                "Certificate already issued, resuming at download"
            );
            return Ok(ResumePoint::Validated(ValidationConfirmed { request, attempts: 0 }));
        }

        Ok(ResumePoint::Unvalidated(RequestSubmitted {
            request,
            resumed: true,
        }))
    }

    /// Init -> CsrGenerated
    pub async fn generate_csr(&self, domain: Domain) -> Result<CsrGenerated, IssuanceError> {
        self.checkpoint()?;
        self.store.ensure_domain_dir(&domain)?;

        if let Some(orphan) = self.store.set_aside_orphaned_keypair(&domain)? {
            warn!(
                domain = %domain,
                "Incomplete key/CSR pair from an earlier run moved to {}",
                orphan.display()
            );
        }

        if let Some(csr) = self.store.load_csr(&domain)? {
            info!(domain = %domain, "Reusing key and CSR from {}", self.store.domain_dir(&domain).display());
            return Ok(self.transition_csr(domain, CsrPem::new(csr)));
        }

        info!(
            domain = %domain,
            "Generating {}-bit private key and CSR",
            self.settings.key_size_bits
        );

        let generator = Arc::clone(&self.generator);
        let identity = self.settings.identity.clone();
        let key_size_bits = self.settings.key_size_bits;
        let task_domain = domain.clone();
        let (key, csr) = tokio::task::spawn_blocking(move || {
            generator.generate(&task_domain, &identity, key_size_bits)
        })
        .await
        .map_err(|e| crate::error::CryptoError::Task(e.to_string()))??;

        let key_path = self.store.write_key(&domain, key.as_str())?;
        info!(domain = %domain, "Saved private key at {}", key_path.display());
        let csr_path = self.store.write_csr(&domain, csr.as_str())?;
        info!(domain = %domain, "Saved CSR at {}", csr_path.display());

        Ok(self.transition_csr(domain, csr))
    }

    fn transition_csr(&self, domain: Domain, csr: CsrPem) -> CsrGenerated {
        log_transition(&domain, Phase::Init, Phase::CsrGenerated);
        CsrGenerated { domain, csr }
    }

    /// CsrGenerated -> RequestSubmitted
    pub async fn submit_request(&self, generated: CsrGenerated) -> Result<RequestSubmitted, IssuanceError> {
        let CsrGenerated { domain, csr } = generated;
        let validity_days = self.settings.validity_days;

        self.checkpoint()?;
        let result = self
            .ca
            .submit_certificate_request(&domain, &csr, validity_days)
            .await?;

        info!(
            domain = %domain,
            certificate_id = %result.certificate_id,
            "Certificate request accepted, CNAME {} -> {}",
            result.challenge.cname_name,
            result.challenge.cname_value
        );

        let request = CertificateRequest {
            certificate_id: result.certificate_id,
            domain,
            validity_days,
            csr,
            challenge: result.challenge,
        };
        self.store.save_request(&request)?;
        log_transition(&request.domain, Phase::CsrGenerated, Phase::RequestSubmitted);

        if !self.settings.settle_delay.is_zero() {
            debug!(
                domain = %request.domain,
                "Waiting {:?} before provisioning the challenge",
                self.settings.settle_delay
            );
            self.pause(self.settings.settle_delay).await?;
        }

        Ok(RequestSubmitted {
            request,
            resumed: false,
        })
    }

    /// RequestSubmitted -> DnsProvisioned
    pub async fn provision_dns(&self, submitted: RequestSubmitted) -> Result<DnsProvisioned, IssuanceError> {
        let resumed = submitted.is_resumed();
        let request = submitted.request;
        let challenge = &request.challenge;

        self.checkpoint()?;
        info!(
            domain = %request.domain,
            resumed,
            "Provisioning CNAME {} -> {} via {}",
            challenge.cname_name,
            challenge.cname_value,
            self.dns.provider_name()
        );
        self.dns
            .upsert_cname(
                &self.settings.hosted_zone_id,
                &challenge.cname_name,
                &challenge.cname_value,
                self.settings.ttl_secs,
            )
            .await?;

        log_transition(&request.domain, Phase::RequestSubmitted, Phase::DnsProvisioned);
        Ok(DnsProvisioned { request })
    }

    /// DnsProvisioned -> ValidationConfirmed.
    ///
    /// The CA answers with an `error` until it can resolve the CNAME, so
    /// those are retried with backoff. Exhausting the budget is a failure,
    /// never a silent fall-through.
    pub async fn confirm_validation(&self, provisioned: DnsProvisioned) -> Result<ValidationConfirmed, IssuanceError> {
        let request = provisioned.request;
        let policy = self.settings.validation_backoff;
        let mut attempt = 0;
        let mut last_response = None;

        log_transition(&request.domain, Phase::DnsProvisioned, Phase::ValidationPending);

        while attempt < policy.max_attempts {
            self.checkpoint()?;
            debug!(
                domain = %request.domain,
                certificate_id = %request.certificate_id,
                attempt = attempt + 1,
                "Submitting {} validation",
                CNAME_CSR_HASH
            );

            let response = self
                .ca
                .submit_challenge_validation(&request.certificate_id, CNAME_CSR_HASH)
                .await?;

            match response {
                ValidationSubmission::Error(error) => {
                    attempt += 1;
                    warn!(
                        domain = %request.domain,
                        attempt,
                        max_attempts = policy.max_attempts,
                        "Validation not accepted yet: {}",
                        error
                    );
                    last_response = Some(error.to_string());

                    if attempt < policy.max_attempts {
                        self.pause(policy.delay_before(attempt)).await?;
                    }
                }
                ValidationSubmission::Status(status) if status == PENDING_VALIDATION => {
                    info!(
                        domain = %request.domain,
                        certificate_id = %request.certificate_id,
                        "Validation submitted, certificate status: {}",
                        status
                    );
                    self.store.mark_validated(&request.domain)?;
                    log_transition(&request.domain, Phase::ValidationPending, Phase::ValidationConfirmed);
                    return Ok(ValidationConfirmed {
                        request,
                        attempts: attempt + 1,
                    });
                }
                ValidationSubmission::Status(status) => {
                    return Err(IssuanceError::Validation {
                        response: format!("status {:?}", status),
                    });
                }
                ValidationSubmission::Unrecognized(body) => {
                    return Err(IssuanceError::Validation {
                        response: body.to_string(),
                    });
                }
            }
        }

        Err(IssuanceError::ValidationTimeout {
            attempts: attempt,
            last_response,
        })
    }

    /// ValidationConfirmed -> Downloaded.
    ///
    /// Issuance typically lags validation by several minutes; poll the
    /// status until it reports completion, then download exactly once.
    pub async fn download(&self, confirmed: ValidationConfirmed) -> Result<Downloaded, IssuanceError> {
        let request = confirmed.request;
        let policy = self.settings.issuance_backoff;
        let mut attempt = 0;
        let mut last_observed = None;

        while attempt < policy.max_attempts {
            self.checkpoint()?;
            let status = self.ca.get_validation_status(&request.certificate_id).await?;
            let completed = &status.validation_completed;
            info!(
                domain = %request.domain,
                certificate_id = %request.certificate_id,
                attempt = attempt + 1,
                "Validation status: {}",
                completed
            );
            last_observed = Some(completed.to_string());

            match completed.as_i64() {
                Some(1) => return self.fetch_bundle(request).await,
                Some(0) => {
                    attempt += 1;
                    if attempt < policy.max_attempts {
                        self.pause(policy.delay_before(attempt)).await?;
                    }
                }
                _ => {
                    return Err(IssuanceError::IssuanceTimeout {
                        attempts: attempt + 1,
                        last_observed,
                    });
                }
            }
        }

        Err(IssuanceError::IssuanceTimeout {
            attempts: attempt,
            last_observed,
        })
    }

    async fn fetch_bundle(&self, request: CertificateRequest) -> Result<Downloaded, IssuanceError> {
        info!(domain = %request.domain, "Certificate issued, downloading bundle");

        self.checkpoint()?;
        let bytes = self.ca.download_certificate(&request.certificate_id).await?;
        if bytes.is_empty() {
            return Err(TransportError::Decode {
                operation: "download certificate",
                message: "empty certificate bundle".to_string(),
            }
            .into());
        }
        let bundle_path = self.store.write_bundle(&request.domain, &bytes)?;

        info!(
            domain = %request.domain,
            certificate_id = %request.certificate_id,
            "Saved {} byte certificate bundle at {}",
            bytes.len(),
            bundle_path.display()
        );
        log_transition(&request.domain, Phase::ValidationConfirmed, Phase::Downloaded);

        Ok(Downloaded {
            domain: request.domain,
            certificate_id: Some(request.certificate_id),
            bundle_path,
        })
    }

    fn checkpoint(&self) -> Result<(), IssuanceError> {
        if self.cancel.is_cancelled() {
            return Err(IssuanceError::Cancelled);
        }
        Ok(())
    }

    async fn pause(&self, duration: Duration) -> Result<(), IssuanceError> {
        self.checkpoint()?;
        debug!("Backing off for {:?}", duration);
        tokio::select! {
            _ = self.cancel.cancelled() => Err(IssuanceError::Cancelled),
            _ = self.sleeper.sleep(duration) => Ok(()),
        }
    }
}

fn log_transition(domain: &Domain, from: Phase, to: Phase) {
    info!(domain = %domain, from = %from, to = %to, "Issuance state transition");
}
