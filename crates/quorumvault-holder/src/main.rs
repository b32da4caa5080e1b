//! quorumvault-holder - keep one share of the store's root key
//!
//! usage:
//!   quorumvault-holder --config holder.toml
//!   quorumvault-holder --share-dir ./holder-1 --epoch 0 --bind 0.0.0.0:8300
//!
//! share files are written by `quorumvault-server init`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use quorumvault::config::HolderConfig;
use quorumvault::holder::{load_or_generate_signing_key, ShareHolder};
use quorumvault_holder::{router, AppState};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "quorumvault-holder")]
#[command(about = "quorumvault share holder - keeps one share of the root key")]
#[command(version)]
struct Args {
    /// toml config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// listen address, overrides the config
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// directory holding share-<epoch>.json
    #[arg(short, long)]
    share_dir: Option<PathBuf>,

    /// epoch served by default
    #[arg(short, long)]
    epoch: Option<u64>,

    /// prometheus endpoint port, disabled when absent
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quorumvault_holder=info".parse()?)
                .add_directive("quorumvault=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => HolderConfig::load(path)?,
        None => HolderConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(dir) = args.share_dir {
        config.share_dir = dir;
    }
    if let Some(epoch) = args.epoch {
        config.epoch = epoch;
    }
    config.validate()?;

    if let Some(port) = args.metrics_port {
        let addr = SocketAddr::new(config.bind.ip(), port);
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install prometheus exporter")?;
        info!("  metrics: {}", addr);
    }

    let signing_key = load_or_generate_signing_key(&config.signing_key_path())?;
    let holder = ShareHolder::new(
        config.share_dir.clone(),
        config.epoch,
        config.store_identity()?,
        signing_key,
    );

    let node = holder.info();
    info!("quorumvault-holder v{}", node.version);
    info!("  epoch: {}", node.epoch);
    info!("  pubkey: {}", node.pubkey);
    info!("  shares: {}", config.share_dir.display());
    info!("  store: {}", config.store_identity);
    info!("  identity from: {:?}", config.identity_source);
    if !node.provisioned {
        warn!("no share for epoch {} yet", node.epoch);
    }

    let state = Arc::new(AppState {
        holder,
        identity: config.identity(),
    });
    let app = router(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!("listening on {}", config.bind);

    axum::serve(listener, app).await?;
    Ok(())
}
