//! Hearth license gate
//!
//! Operator CLI and standalone server for the license gate:
//! 1. Serves the authority push endpoint behind the enforcement middleware
//! 2. Installs, re-verifies and removes the local license
//! 3. Creates and removes the time-boxed panic override
//!
//! Usage:
//!   hearth-gate --config gate.toml serve --bind 0.0.0.0:8080
//!   hearth-gate create-override

use std::{net::SocketAddr, path::PathBuf};

use anyhow::{bail, Context, Result};
use axum::Router;
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use hearth_gate::{panic_unlock, serve, with_enforcement, Services};
use hearth_license::{
    parse_public_key_pem, rsa_components_b64url, GateConfig, LicenseRecord, LicenseStatusView,
    RemoveOutcome, RequestContext, SelfCheck,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "hearth-gate")]
#[command(about = "License gate for self-hosted deployments")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the boot self-check, then serve the push endpoint behind the gate
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },
    /// Force the gate open for the configured lifetime
    CreateOverride,
    /// Remove the panic override
    RemoveOverride,
    /// Show the installed license and the current decision
    Status,
    /// Verify a license key with the authority and install it
    Install {
        /// License key issued by the authority
        key: String,
    },
    /// Re-verify the installed license with the authority
    Reverify,
    /// Remove an inactive license
    RemoveLicense,
    /// Compare the bundled key against the authority's published keys
    SelfCheck,
    /// Fetch the authority's public key and compare it with the bundled key
    AuthorityKey,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = GateConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command {
        Command::CreateOverride => {
            let token = panic_unlock(&config).create(Utc::now())?;
            println!(
                "Panic override active until {}",
                token.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            );
        }
        Command::RemoveOverride => match panic_unlock(&config).remove(Utc::now())? {
            RemoveOutcome::Removed => println!("Panic override removed"),
            RemoveOutcome::AlreadyAbsent => println!("No panic override present"),
        },
        Command::Serve { bind } => run_server(config, bind).await?,
        Command::Status => status(&Services::from_config(config)?),
        Command::Install { key } => {
            let record = Services::from_config(config)?
                .manager()
                .install(&key, Utc::now())
                .await?;
            println!("License installed");
            print_record(&record);
        }
        Command::Reverify => {
            let record = Services::from_config(config)?
                .manager()
                .reverify(Utc::now())
                .await?;
            println!("License re-verified");
            print_record(&record);
        }
        Command::RemoveLicense => {
            Services::from_config(config)?.manager().remove()?;
            println!("License removed");
        }
        Command::SelfCheck => {
            let services = Services::from_config(config)?;
            match services.resolver.self_check().await? {
                SelfCheck::Matched { kid } => {
                    println!("Bundled key matches authority key {}", kid.as_deref().unwrap_or("(no kid)"));
                }
                SelfCheck::Skipped(reason) => println!("Self-check skipped: {reason}"),
            }
        }
        Command::AuthorityKey => authority_key(&Services::from_config(config)?).await?,
    }
    Ok(())
}

async fn run_server(config: GateConfig, bind: SocketAddr) -> Result<()> {
    info!("Hearth license gate starting...");
    let services = Services::from_config(config)?;

    services.boot_check().await?;

    let state = services.gate_state();
    info!("Licensed host: {}", state.host);
    let app = with_enforcement(Router::new(), state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    serve(listener, app).await
}

fn status(services: &Services) {
    let host = services.config.app_host();
    println!("Host:      {host}");
    println!("Storage:   {}", services.store.path().display());

    match services.manager().status() {
        LicenseStatusView::Missing => println!("License:   not installed"),
        LicenseStatusView::Unreadable(reason) => println!("License:   unreadable ({reason})"),
        LicenseStatusView::Installed(record) => print_record(&record),
    }

    let decision = services
        .engine()
        .decide(&RequestContext::web("/", &host), Utc::now());
    match decision.message() {
        None => println!("Decision:  allow"),
        Some(message) => println!("Decision:  block ({message})"),
    }
}

fn print_record(record: &LicenseRecord) {
    println!("Key:       {}", record.license_key);
    println!("Domain:    {}", record.domain);
    println!("Valid:     {}", record.data.valid);
    if record.data.pending {
        println!("Pending:   true");
    }
    if let Some(expires) = record.data.expires_at {
        println!("Expires:   {}", expires.to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    if let Some(message) = &record.data.message {
        println!("Message:   {message}");
    }
    println!("Fetched:   {}", record.fetched_at.to_rfc3339_opts(SecondsFormat::Secs, true));
}

async fn authority_key(services: &Services) -> Result<()> {
    let Some(authority) = services.resolver.authority() else {
        bail!("No license authority configured");
    };
    let pem = authority
        .fetch_public_key_pem()
        .await
        .context("Failed to fetch authority public key")?;
    let published = parse_public_key_pem(&pem).map_err(anyhow::Error::msg)?;

    println!("{}", pem.trim());
    match services.resolver.bundled_key() {
        Some(bundled) if rsa_components_b64url(bundled) == rsa_components_b64url(&published) => {
            println!("Bundled key matches the authority's published key");
        }
        Some(_) => bail!("Bundled key differs from the authority's published key"),
        None => println!("No bundled key configured"),
    }
    Ok(())
}
