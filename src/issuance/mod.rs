// Certificate issuance: key/CSR generation, CA client, DNS provisioning and orchestration

pub mod backoff;
pub mod csr;
pub mod dns_provider;
pub mod domain;
pub mod orchestrator;
pub mod storage;
pub mod zerossl;

pub use backoff::{BackoffPolicy, Sleeper, TokioSleeper};
pub use csr::{CsrPem, IdentityProfile, KeyGenerator, PrivateKeyPem, RsaCsrGenerator};
pub use dns_provider::{DnsProvider, Route53DnsProvider};
pub use domain::Domain;
pub use orchestrator::{CertificateRequest, Downloaded, IssuanceOrchestrator, IssuanceSettings};
pub use storage::ArtifactStore;
pub use zerossl::{CertificateAuthority, ValidationChallenge, ValidationSubmission, ZeroSslClient};
