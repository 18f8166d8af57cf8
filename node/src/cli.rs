//! # CLI Interface
//!
//! Defines the command-line argument structure for `didsrv` using `clap`
//! derive. Supports three subcommands: `start`, `resolve`, and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use didsrv_protocol::config::{DEFAULT_GATEWAY_URL, DEFAULT_INVOICE_AMOUNT};

/// did:web registration and resolution server.
///
/// Issues `did:web` identities under a single domain once a Lightning
/// invoice has been paid, serves them at their well-known locations, and
/// resolves identities hosted elsewhere.
#[derive(Parser, Debug)]
#[command(
    name = "didsrv",
    about = "did:web registration and resolution server",
    version,
    propagate_version = true
)]
pub struct DidsrvCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the `didsrv` binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server.
    Start(StartArgs),
    /// Parse and resolve one or more identifiers, printing the documents.
    Resolve(ResolveArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `start` subcommand.
#[derive(Parser, Debug)]
pub struct StartArgs {
    /// Domain identities are issued under, e.g. `example.com`.
    #[arg(long, short = 'd', env = "DIDSRV_DOMAIN")]
    pub domain: String,

    /// Directory holding the database.
    ///
    /// Defaults to `$HOME/.did-web/storage`. Created if it does not exist.
    #[arg(long, short = 's', env = "DIDSRV_STORAGE")]
    pub storage: Option<PathBuf>,

    /// Invoice key for the LNbits wallet that receives registration fees.
    #[arg(long, short = 'a', env = "DIDSRV_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Base URL of the LNbits instance.
    #[arg(long, env = "DIDSRV_GATEWAY_URL", default_value = DEFAULT_GATEWAY_URL)]
    pub gateway_url: String,

    /// Public base URL the gateway calls back on. Defaults to `https://<domain>`.
    #[arg(long, env = "DIDSRV_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Registration fee in satoshis.
    #[arg(long, env = "DIDSRV_INVOICE_AMOUNT", default_value_t = DEFAULT_INVOICE_AMOUNT)]
    pub invoice_amount: u64,

    /// Address to bind the HTTP API to.
    #[arg(long, env = "DIDSRV_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port for the HTTP API.
    #[arg(long, short = 'p', env = "DIDSRV_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "DIDSRV_METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    /// Key required in `X-Api-Key` to delete identities.
    ///
    /// When omitted, deletion is disabled.
    #[arg(long, env = "DIDSRV_ADMIN_KEY", hide_env_values = true)]
    pub admin_key: Option<String>,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "DIDSRV_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

impl StartArgs {
    /// The storage directory, falling back to `$HOME/.did-web/storage`.
    pub fn storage_dir(&self) -> PathBuf {
        self.storage.clone().unwrap_or_else(default_storage_dir)
    }

    /// The webhook base URL, falling back to `https://<domain>`.
    pub fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("https://{}", self.domain))
    }
}

/// Arguments for the `resolve` subcommand.
#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Identifiers to resolve, e.g. `did:web:example.com:alice`.
    #[arg(required = true)]
    pub dids: Vec<String>,

    /// Fetch over plain HTTP instead of HTTPS.
    #[arg(long)]
    pub insecure: bool,
}

fn default_storage_dir() -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
    home.join(".did-web").join("storage")
}
