//! unzip-bridge CLI entry point.
//!
//! Reads a zip archive, runs it through the guest module and prints every
//! extracted JSON document on its own line.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use unzip_bridge_common::{BridgeError, ConfigFile};
use unzip_bridge_host::{Bridge, EMBEDDED_MODULE};

/// Extract JSON documents from a zip archive through a sandboxed guest.
#[derive(Parser, Debug)]
#[command(name = "unzip-bridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Zip archive to extract
    archive: PathBuf,

    /// TOML configuration file
    #[arg(short, long, env = "UNZIP_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Base64-encoded guest module (overrides `guest.module_path`)
    #[arg(short, long, env = "UNZIP_BRIDGE_MODULE")]
    module: Option<PathBuf>,

    /// Give up after this many seconds
    #[arg(long, env = "UNZIP_BRIDGE_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Pretty-print each document
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the documents.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,unzip_bridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConfigFile::default(),
    };

    let encoded = load_module(&cli, &config)?;
    let archive = tokio::fs::read(&cli.archive)
        .await
        .with_context(|| format!("Failed to read archive {}", cli.archive.display()))?;

    info!(
        archive = %cli.archive.display(),
        archive_bytes = archive.len(),
        "Extracting archive"
    );

    let bridge_config = config.bridge.clone();
    let work = tokio::task::spawn_blocking(move || -> Result<Vec<Value>, BridgeError> {
        let mut bridge = Bridge::new(bridge_config)?;
        bridge.initialize(&encoded)?;
        bridge.extract_documents(&archive)
    });

    let joined = match cli.timeout_secs.or(config.cli.timeout_secs) {
        Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), work).await {
            Ok(joined) => joined,
            Err(_) => {
                // The guest call cannot be interrupted; leave it behind.
                error!(timeout_secs = secs, "Extraction timed out");
                std::process::exit(2);
            }
        },
        None => work.await,
    };
    let documents = joined
        .context("Extraction task failed")?
        .context("Extraction failed")?;

    let pretty = cli.pretty || config.cli.pretty;
    let mut stdout = std::io::stdout().lock();
    for document in &documents {
        let line = if pretty {
            serde_json::to_string_pretty(document)?
        } else {
            serde_json::to_string(document)?
        };
        writeln!(stdout, "{line}")?;
    }

    info!(documents = documents.len(), "Extraction complete");
    Ok(())
}

/// Base64 module text from `--module`, the config file, or the build.
fn load_module(cli: &Cli, config: &ConfigFile) -> anyhow::Result<String> {
    let path = cli
        .module
        .clone()
        .or_else(|| config.guest.module_path.as_ref().map(PathBuf::from));

    match path {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read guest module {}", path.display())),
        None => EMBEDDED_MODULE.map(str::to_owned).context(
            "No guest module: pass --module, set guest.module_path, \
             or build with UNZIP_BRIDGE_MODULE_B64",
        ),
    }
}
