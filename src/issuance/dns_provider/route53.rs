//! AWS Route53 DNS provider

use async_trait::async_trait;
use aws_sdk_route53::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_route53::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_route53::operation::change_resource_record_sets::ChangeResourceRecordSetsError;
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};
use aws_sdk_route53::Client;
use tracing::{debug, info};

use super::DnsProvider;
use crate::error::ProvisionError;

/// Error codes Route53 answers with when the credentials are rejected
const AUTH_ERROR_CODES: &[&str] = &[
    "InvalidClientTokenId",
    "SignatureDoesNotMatch",
    "AccessDenied",
    "AccessDeniedException",
    "UnrecognizedClientException",
    "ExpiredToken",
];

#[derive(Clone)]
pub struct Route53DnsProvider {
    client: Client,
}

impl std::fmt::Debug for Route53DnsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route53DnsProvider").finish_non_exhaustive()
    }
}

impl Route53DnsProvider {
    /// Build a client from static credentials. Route53 is a global service
    /// served from us-east-1, so `region` rarely needs changing.
    pub fn new(access_key_id: String, secret_access_key: String, region: &str) -> Self {
        let credentials = Credentials::new(access_key_id, secret_access_key, None, None, "zerossl-route53");
        let config = aws_sdk_route53::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(credentials)
            .build();

        Self::from_client(Client::from_conf(config))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

/// Build the single-change UPSERT batch for a CNAME record
pub fn cname_change_batch(name: &str, value: &str, ttl_secs: i64) -> Result<ChangeBatch, ProvisionError> {
    let invalid = |e: aws_sdk_route53::error::BuildError| ProvisionError::InvalidChange(e.to_string());

    let record = ResourceRecord::builder().value(value).build().map_err(invalid)?;
    let record_set = ResourceRecordSet::builder()
        .name(name)
        .r#type(RrType::Cname)
        .ttl(ttl_secs)
        .resource_records(record)
        .build()
        .map_err(invalid)?;
    let change = Change::builder()
        .action(ChangeAction::Upsert)
        .resource_record_set(record_set)
        .build()
        .map_err(invalid)?;

    ChangeBatch::builder()
        .comment(format!("add {} -> {}", name, value))
        .changes(change)
        .build()
        .map_err(invalid)
}

fn classify_error(zone_id: &str, err: SdkError<ChangeResourceRecordSetsError>) -> ProvisionError {
    let message = DisplayErrorContext(&err).to_string();

    match err.as_service_error() {
        Some(service) if service.is_no_such_hosted_zone() => ProvisionError::ZoneNotFound {
            zone_id: zone_id.to_string(),
        },
        Some(service) if service.is_invalid_change_batch() || service.is_invalid_input() => {
            ProvisionError::InvalidChange(message)
        }
        Some(service) if service.code().is_some_and(|code| AUTH_ERROR_CODES.contains(&code)) => {
            ProvisionError::Authentication(message)
        }
        _ => ProvisionError::Api(message),
    }
}

#[async_trait]
impl DnsProvider for Route53DnsProvider {
    async fn upsert_cname(
        &self,
        zone_id: &str,
        name: &str,
        value: &str,
        ttl_secs: i64,
    ) -> Result<(), ProvisionError> {
        info!("Upserting CNAME record on Route53: {} -> {}", name, value);

        let batch = cname_change_batch(name, value, ttl_secs)?;
        let output = self
            .client
            .change_resource_record_sets()
            .hosted_zone_id(zone_id)
            .change_batch(batch)
            .send()
            .await
            .map_err(|e| classify_error(zone_id, e))?;

        debug!("Route53 change submitted: {:?}", output.change_info());

        info!("CNAME record upserted in hosted zone {}", zone_id);
        Ok(())
    }

    fn provider_name(&self) -> &str {
        "AWS Route53"
    }
}
