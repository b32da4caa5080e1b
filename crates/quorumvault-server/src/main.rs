//! quorumvault-server - secrets behind a quorum of share holders
//!
//! usage:
//!   quorumvault-server init --threshold 3 --shares 5 --out ./ceremony
//!   quorumvault-server serve --config store.toml
//!
//! `init` writes one share file per holder and forgets the key. `serve`
//! starts sealed and asks the configured holders for shares.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use metrics::gauge;
use metrics_exporter_prometheus::PrometheusBuilder;
use quorumvault::config::StoreConfig;
use quorumvault::network::HolderClient;
use quorumvault::recovery::{RecoveryCoordinator, ShareSource};
use quorumvault::store::{SecretStore, SledBackend};
use quorumvault_server::{apply_policy_files, key_ceremony, router, start_recovery, AppState};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "quorumvault-server")]
#[command(about = "quorumvault secret store - policy-gated secrets under a threshold-recovered root key")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// run the store
    Serve {
        /// toml config file
        #[arg(short, long)]
        config: PathBuf,

        /// listen address, overrides the config
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// prometheus endpoint port, disabled when absent
        #[arg(long)]
        metrics_port: Option<u16>,
    },
    /// generate a root key and split it into holder share files
    Init {
        /// shares needed to recover
        #[arg(short, long)]
        threshold: usize,

        /// shares to create, one per holder
        #[arg(short, long)]
        shares: usize,

        /// output directory, gets one holder-<i> subdirectory per share
        #[arg(short, long)]
        out: PathBuf,

        /// key epoch written into the share file names
        #[arg(short, long, default_value = "0")]
        epoch: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quorumvault_server=info".parse()?)
                .add_directive("quorumvault=info".parse()?),
        )
        .init();

    match Args::parse().command {
        Command::Init {
            threshold,
            shares,
            out,
            epoch,
        } => {
            let (key_id, written) = key_ceremony(threshold, shares, &out, epoch)?;
            info!("root key {} split {}-of-{}", key_id, threshold, shares);
            for path in written {
                info!("  {}", path.display());
            }
            warn!("deliver each holder directory to its holder, then delete {}", out.display());
            Ok(())
        }
        Command::Serve {
            config,
            bind,
            metrics_port,
        } => serve(config, bind, metrics_port).await,
    }
}

async fn serve(
    config_path: PathBuf,
    bind: Option<SocketAddr>,
    metrics_port: Option<u16>,
) -> anyhow::Result<()> {
    let mut config = StoreConfig::load(&config_path)?;
    if let Some(bind) = bind {
        config.bind = bind;
    }

    if let Some(port) = metrics_port {
        let addr = SocketAddr::new(config.bind.ip(), port);
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install prometheus exporter")?;
        info!("  metrics: {}", addr);
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create {}", config.data_dir.display()))?;
    let backend = SledBackend::open(config.data_dir.join("db"))?;
    let store = Arc::new(SecretStore::open(Arc::new(backend))?);
    apply_policy_files(&store, &config.policy_files, config.replace_policies)?;

    let identity = config.store_identity()?;
    // with xfcc the holders' proxy derives our identity from the client cert
    let inbound = config.identity();
    let mut sources: Vec<Arc<dyn ShareSource>> = Vec::with_capacity(config.holders.len());
    for endpoint in &config.holders {
        if endpoint.verifying_key.is_none() {
            warn!(holder = %endpoint.id, "no verifying_key pinned, share signatures unchecked");
        }
        let client = HolderClient::new(endpoint, inbound.client_header(), identity.clone())?;
        sources.push(Arc::new(client));
    }
    let coordinator = Arc::new(RecoveryCoordinator::new(
        sources,
        config.threshold,
        config.recovery.policy(),
    )?);

    info!("quorumvault-server v{}", env!("CARGO_PKG_VERSION"));
    info!("  data: {}", config.data_dir.display());
    info!("  holders: {} (threshold {})", config.holders.len(), config.threshold);
    info!("  policies: {}", store.policies().list().len());

    let state = Arc::new(AppState::new(
        store.clone(),
        coordinator,
        config.holders.len(),
        inbound,
        config.request_timeout(),
    ));

    gauge!("store_sealed").set(1.0);
    if config.auto_unseal {
        start_recovery(&state);
    }

    let app = router(state).layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!("listening on {}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    store.seal();
    info!("shut down, root key dropped");
    Ok(())
}
