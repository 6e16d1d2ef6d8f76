use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use zerossl_route53::config::{self, Config, Secrets};
use zerossl_route53::issuance::{
    ArtifactStore, CertificateAuthority, Domain, IssuanceOrchestrator, IssuanceSettings,
    Route53DnsProvider, RsaCsrGenerator, ZeroSslClient,
};
use zerossl_route53::observability;

#[derive(Parser)]
#[command(name = "zerossl-route53")]
#[command(about = "Issue ZeroSSL certificates validated through Route53 CNAME records", long_about = None)]
struct Cli {
    /// Config file path (defaults apply when the file does not exist)
    #[arg(short, long, default_value = "zerossl.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Request, validate and download a certificate for a domain
    Issue {
        /// Domain (or subdomain) to certify
        #[arg(short = 'd', long)]
        domain_name: String,
    },
    /// List certificates known to the CA account
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config_or_default(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config))?;
    config::validate_config(&config)?;
    let _guard = observability::logging::init_logging(&config.logging);

    let secrets = Secrets::from_env()?;
    let ca = ZeroSslClient::new(
        config.zerossl.api_base_url.clone(),
        secrets.zerossl_api_key.clone(),
        Duration::from_secs(config.zerossl.request_timeout_secs),
    )?;

    match cli.command {
        Commands::Issue { domain_name } => issue(&config, &secrets, ca, &domain_name).await,
        Commands::List => list(&ca).await,
    }
}

async fn issue(config: &Config, secrets: &Secrets, ca: ZeroSslClient, domain_name: &str) -> Result<()> {
    let domain = Domain::parse(domain_name)?;

    let dns = Route53DnsProvider::new(
        secrets.aws_access_key_id.clone(),
        secrets.aws_secret_access_key.clone(),
        &config.route53.region,
    );

    let cancel = CancellationToken::new();
    let orchestrator = IssuanceOrchestrator::new(
        Arc::new(ca),
        Arc::new(dns),
        Arc::new(RsaCsrGenerator),
        ArtifactStore::new(&config.certificate.cert_dir),
        IssuanceSettings::from_config(config),
    )
    .with_cancellation(cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling issuance");
            cancel.cancel();
        }
    });

    match orchestrator.run(domain).await {
        Ok(downloaded) => {
            info!(
                "Certificate for {} saved at {}",
                downloaded.domain,
                downloaded.bundle_path.display()
            );
            Ok(())
        }
        Err(e) => {
            error!("Certificate issuance failed: {}", e);
            Err(e).context("Certificate issuance failed")
        }
    }
}

async fn list(ca: &ZeroSslClient) -> Result<()> {
    let certificates = ca
        .list_certificates()
        .await
        .context("Failed to list certificates")?;

    let now = Utc::now();
    println!("{:<40} {:<20} {:<20} {:>10}", "COMMON NAME", "EXPIRES", "STATUS", "DAYS LEFT");
    for certificate in &certificates {
        let days_left = certificate
            .days_until_expiry(now)
            .map(|days| days.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<40} {:<20} {:<20} {:>10}",
            certificate.common_name,
            certificate.expires,
            certificate.status.as_str(),
            days_left
        );
    }
    info!("Listed {} certificates", certificates.len());

    Ok(())
}
