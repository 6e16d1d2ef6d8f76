//! RSA private key and certificate signing request generation

use rand::rngs::OsRng;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_RSA_SHA256};
use rsa::pkcs8::{DecodePublicKey, EncodePrivateKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::prelude::FromDer;
use zeroize::Zeroizing;

use super::domain::Domain;
use crate::error::CryptoError;

pub const MIN_KEY_SIZE_BITS: u32 = 2048;
pub const DEFAULT_KEY_SIZE_BITS: u32 = 4096;

/// Subject fields placed in every CSR alongside the common name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityProfile {
    pub country: String,
    pub state: String,
    pub locality: String,
    pub organization: String,
    pub organizational_unit: String,
}

impl Default for IdentityProfile {
    fn default() -> Self {
        Self {
            country: "UK".to_string(),
            state: "Berkshire".to_string(),
            locality: "Reading".to_string(),
            organization: "Jubilee".to_string(),
            organizational_unit: "Homelab".to_string(),
        }
    }
}

/// PKCS#8 PEM private key, wiped from memory on drop
#[derive(Clone)]
pub struct PrivateKeyPem(Zeroizing<String>);

impl PrivateKeyPem {
    pub fn new(pem: String) -> Self {
        Self(Zeroizing::new(pem))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for PrivateKeyPem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKeyPem(<REDACTED>)")
    }
}

/// PEM-encoded PKCS#10 certificate signing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CsrPem(String);

impl CsrPem {
    pub fn new(pem: String) -> Self {
        Self(pem)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Source of key material for a run.
///
/// Implementations must be deterministic in shape only: the returned CSR
/// always carries the public half of the returned key.
pub trait KeyGenerator: Send + Sync {
    fn generate(
        &self,
        domain: &Domain,
        identity: &IdentityProfile,
        key_size_bits: u32,
    ) -> Result<(PrivateKeyPem, CsrPem), CryptoError>;
}

/// RSA key generation with SHA-256 signed CSRs
#[derive(Debug, Clone, Default)]
pub struct RsaCsrGenerator;

impl KeyGenerator for RsaCsrGenerator {
    fn generate(
        &self,
        domain: &Domain,
        identity: &IdentityProfile,
        key_size_bits: u32,
    ) -> Result<(PrivateKeyPem, CsrPem), CryptoError> {
        if domain.as_str().is_empty() {
            return Err(CryptoError::EmptyDomain);
        }
        if key_size_bits < MIN_KEY_SIZE_BITS {
            return Err(CryptoError::KeySizeTooSmall(key_size_bits));
        }

        debug!("Generating {}-bit RSA key for {}", key_size_bits, domain);
        let private_key = RsaPrivateKey::new(&mut OsRng, key_size_bits as usize)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let key_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;

        let signing_key = KeyPair::from_pkcs8_pem_and_sign_algo(&key_pem, &PKCS_RSA_SHA256)?;

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(domain, identity);

        let csr_pem = CsrPem::new(params.serialize_request(&signing_key)?.pem()?);

        let public_key = RsaPublicKey::from(&private_key);
        if !csr_matches_public_key(&csr_pem, &public_key)? {
            return Err(CryptoError::PublicKeyMismatch);
        }

        Ok((PrivateKeyPem(key_pem), csr_pem))
    }
}

fn distinguished_name(domain: &Domain, identity: &IdentityProfile) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CountryName, identity.country.as_str());
    dn.push(DnType::StateOrProvinceName, identity.state.as_str());
    dn.push(DnType::LocalityName, identity.locality.as_str());
    dn.push(DnType::OrganizationName, identity.organization.as_str());
    dn.push(DnType::OrganizationalUnitName, identity.organizational_unit.as_str());
    dn.push(DnType::CommonName, domain.as_str());
    dn
}

/// Decode the SubjectPublicKeyInfo embedded in a PEM CSR
pub fn csr_public_key(csr: &CsrPem) -> Result<RsaPublicKey, CryptoError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(csr.as_str().as_bytes())
        .map_err(|e| CryptoError::CsrParse(e.to_string()))?;
    let (_, request) = X509CertificationRequest::from_der(&pem.contents)
        .map_err(|e| CryptoError::CsrParse(e.to_string()))?;

    RsaPublicKey::from_public_key_der(request.certification_request_info.subject_pki.raw)
        .map_err(|e| CryptoError::CsrParse(e.to_string()))
}

pub fn csr_matches_public_key(csr: &CsrPem, public_key: &RsaPublicKey) -> Result<bool, CryptoError> {
    Ok(&csr_public_key(csr)? == public_key)
}
