// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # didsrv
//!
//! Entry point for the `didsrv` binary. Parses CLI arguments, initializes
//! logging and metrics, opens the identity store, and serves the HTTP API.
//!
//! The binary supports three subcommands:
//!
//! - `start`   : run the registration and resolution server
//! - `resolve` : resolve identifiers from the command line
//! - `version` : print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use didsrv_protocol::broker::PaymentBroker;
use didsrv_protocol::config::{GATEWAY_TIMEOUT, PROTOCOL_VERSION, RESOLVE_TIMEOUT};
use didsrv_protocol::didweb::{DidWebUrl, Resolver};
use didsrv_protocol::payment::LnbitsGateway;
use didsrv_protocol::registration::{RegistrationConfig, RegistrationService};
use didsrv_protocol::storage::Database;

use cli::{Commands, DidsrvCli};
use logging::LogFormat;
use metrics::ServerMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DidsrvCli::parse();

    match cli.command {
        Commands::Start(args) => start_server(args).await,
        Commands::Resolve(args) => resolve_ids(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the server: API endpoint, metrics endpoint, and the payment
/// notification broker.
async fn start_server(args: cli::StartArgs) -> Result<()> {
    logging::init_logging(
        "didsrv_node=info,didsrv_protocol=info,tower_http=debug",
        LogFormat::from_str_lossy(&args.log_format),
    )
    .context("failed to initialize logging")?;

    let storage_dir = args.storage_dir();
    tracing::info!(
        domain = %args.domain,
        port = args.port,
        metrics_port = args.metrics_port,
        storage = %storage_dir.display(),
        "starting didsrv"
    );

    // --- Persistent storage ---
    let db = Database::open(&storage_dir)
        .with_context(|| format!("failed to open database at {}", storage_dir.display()))?;
    tracing::info!(path = %storage_dir.display(), "database opened");

    // --- Payment gateway ---
    let client = reqwest::Client::builder()
        .user_agent(concat!("didsrv/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;
    let gateway = LnbitsGateway::new(client.clone(), args.gateway_url.clone(), args.api_key.clone())
        .with_timeout(GATEWAY_TIMEOUT);

    // --- Registration ---
    let config = RegistrationConfig {
        domain: args.domain.clone(),
        public_url: args.public_url(),
        invoice_amount: args.invoice_amount,
    };
    let registration = RegistrationService::from_database(&db, config, Arc::new(gateway))
        .context("failed to open identity stores")?;

    // --- Metrics ---
    let server_metrics = Arc::new(ServerMetrics::new().context("failed to register metrics")?);

    // --- Application state ---
    let app_state = api::AppState {
        domain: args.domain.clone(),
        registration,
        resolver: Resolver::new(client),
        broker: PaymentBroker::start(),
        metrics: Arc::clone(&server_metrics),
        admin_key: args.admin_key.clone(),
    };
    if app_state.admin_key.is_none() {
        tracing::warn!("no admin key configured, deletion is disabled");
    }

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("{}:{}", args.host, args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&server_metrics));
    let metrics_addr = format!("{}:{}", args.host, args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    db.flush().context("failed to flush database")?;
    tracing::info!("didsrv stopped");
    Ok(())
}

/// Resolves each identifier and prints its document to stdout.
///
/// Keeps going after a failure; exits non-zero if any identifier failed.
async fn resolve_ids(args: cli::ResolveArgs) -> Result<()> {
    logging::init_logging("didsrv_node=warn,didsrv_protocol=warn", LogFormat::Pretty)
        .context("failed to initialize logging")?;

    let client = reqwest::Client::builder()
        .timeout(RESOLVE_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;
    let mut resolver = Resolver::new(client);
    if args.insecure {
        resolver = resolver.insecure();
    }

    let mut failures = 0usize;
    for did in &args.dids {
        let parsed = match DidWebUrl::parse_id(did) {
            Ok(parsed) => parsed,
            Err(e) => {
                eprintln!("{did}: {e}");
                failures += 1;
                continue;
            }
        };
        let canonical = parsed.did();
        println!("{canonical}");

        match resolver.resolve(&canonical).await {
            Ok(doc) => {
                let json = serde_json::to_string_pretty(&doc)
                    .context("failed to encode document")?;
                println!("{json}");
            }
            Err(e) => {
                eprintln!("{did}: {e}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} identifiers failed to resolve", args.dids.len());
    }
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("didsrv   {}", env!("CARGO_PKG_VERSION"));
    println!("protocol {}", PROTOCOL_VERSION);
    println!("rustc    {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. A handler that cannot
/// be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
