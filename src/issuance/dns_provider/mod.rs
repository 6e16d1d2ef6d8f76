//! DNS provider abstraction for CNAME challenge records

pub mod route53;

pub use route53::Route53DnsProvider;

use async_trait::async_trait;

use crate::error::ProvisionError;

/// TTL used for challenge records
pub const CHALLENGE_RECORD_TTL_SECS: i64 = 300;

/// DNS provider trait for CNAME challenge provisioning
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Create or replace a CNAME record. Calling twice with identical
    /// arguments must leave the zone unchanged after the second call.
    async fn upsert_cname(
        &self,
        zone_id: &str,
        name: &str,
        value: &str,
        ttl_secs: i64,
    ) -> Result<(), ProvisionError>;

    /// Get provider name for logging
    fn provider_name(&self) -> &str;
}
