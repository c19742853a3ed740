//! Tether host
//!
//! Serves the built-in script evaluator to `tether` shells over TCP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use tether::{FileCatalog, HostConfig, ScriptEvaluator};
use tether_host::{ServerBridge, preload_resources, shutdown_signal};

/// Tether host - evaluates shell commands sent over TCP
#[derive(Parser, Debug)]
#[command(name = "tether-host")]
#[command(about = "Evaluation host for the tether shell")]
struct Args {
    /// Address to listen on [default: 0.0.0.0:5448]
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Script resource to load at startup (repeatable)
    #[arg(long = "resource", value_name = "PATH")]
    resources: Vec<PathBuf>,

    /// JSON config file; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => HostConfig::from_file(path)?,
        None => HostConfig::default(),
    };
    if let Some(addr) = args.addr {
        config.addr = addr;
    }
    if !args.resources.is_empty() {
        config.resources = args.resources;
    }

    let evaluator = Arc::new(ScriptEvaluator::new());
    let catalog = Arc::new(FileCatalog::new(config.resources.clone()));
    let loaded = preload_resources(evaluator.as_ref(), catalog.as_ref());
    tracing::info!("Loaded {} of {} resources", loaded, catalog.paths().len());

    let addr = config.addr;
    let server = ServerBridge::bind(config, evaluator, catalog)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    server.run_until(shutdown_signal()).await;

    Ok(())
}
