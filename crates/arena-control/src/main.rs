// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Arena control-plane binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use arena_auth::{KeyMaterial, SigningMaterial, TokenMinter, TokenValidator, ValidationMode};
use arena_config::sections::{AuthConfig, ControlServiceConfig};
use arena_config::{ConfigService, FsConfigStore};
use arena_control::autoscaler::{Autoscaler, AutoscalerConfig};
use arena_control::http::{self, AppState};
use arena_control::matches::MatchRegistry;
use arena_control::node_client::NodeClient;
use arena_control::proxy::NodeProxy;
use arena_control::registry::NodeRegistry;
use arena_control::router::MatchRouter;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "arena-control", about = "Arena cluster control plane")]
struct Args {
    /// Config directory (defaults to the platform config dir).
    #[arg(long)]
    config_dir: Option<PathBuf>,
    /// Listen address override.
    #[arg(long)]
    listen: Option<String>,
}

fn build_validator(auth: &AuthConfig) -> Result<TokenValidator> {
    let mode = if auth.mode == "remote" {
        ValidationMode::Remote {
            url: auth.remote_url.clone(),
            timeout: Duration::from_millis(auth.remote_timeout_ms),
        }
    } else if auth.public_key_pem_path.is_empty() {
        ValidationMode::Local(KeyMaterial::HmacSecret(auth.hmac_secret.clone().into_bytes()))
    } else {
        let pem = std::fs::read(&auth.public_key_pem_path)
            .with_context(|| format!("reading {}", auth.public_key_pem_path))?;
        ValidationMode::Local(KeyMaterial::Ed25519Pem(pem))
    };
    TokenValidator::new(mode).context("building token validator")
}

fn build_minter(auth: &AuthConfig, ttl_secs: u64) -> Result<TokenMinter> {
    let material = if auth.private_key_pem_path.is_empty() {
        SigningMaterial::HmacSecret(auth.hmac_secret.clone().into_bytes())
    } else {
        let pem = std::fs::read(&auth.private_key_pem_path)
            .with_context(|| format!("reading {}", auth.private_key_pem_path))?;
        SigningMaterial::Ed25519Pem(pem)
    };
    TokenMinter::new(material, Duration::from_secs(ttl_secs)).context("building token minter")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let store = match args.config_dir {
        Some(dir) => FsConfigStore::with_base(dir),
        None => FsConfigStore::new(),
    }
    .context("opening config store")?;
    let configs = ConfigService::new(store);
    let mut config: ControlServiceConfig = configs.load_or_init("control")?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    let auth: AuthConfig = configs.load_or_init("auth")?;

    let validator = Arc::new(build_validator(&auth)?);
    let minter = Arc::new(build_minter(&auth, config.match_token_ttl_secs)?);

    let nodes = Arc::new(NodeRegistry::new(Duration::from_millis(config.node_ttl_ms)));
    let matches = Arc::new(MatchRegistry::new());
    let node_client = NodeClient::new(
        Duration::from_millis(config.node_request_timeout_ms),
        None,
    );
    let router = Arc::new(MatchRouter::new(
        Arc::clone(&nodes),
        Arc::clone(&matches),
        node_client,
        Arc::clone(&minter),
        config.advertise_tls,
    ));
    let autoscaler = Arc::new(Autoscaler::new(AutoscalerConfig {
        scale_up_threshold: config.scale_up_threshold,
        scale_down_threshold: config.scale_down_threshold,
        cooldown: Duration::from_millis(config.autoscale_cooldown_ms),
    }));
    let proxy = Arc::new(NodeProxy::new(
        config.proxy_enabled,
        Duration::from_millis(config.node_request_timeout_ms),
    ));

    // Background sweeper: expire silent nodes.
    {
        let nodes = Arc::clone(&nodes);
        let period = Duration::from_millis(config.sweep_interval_ms.max(100));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                nodes.sweep(Instant::now());
            }
        });
    }

    // Autoscaling control loop.
    {
        let nodes = Arc::clone(&nodes);
        let autoscaler = Arc::clone(&autoscaler);
        let period = Duration::from_millis(config.autoscale_interval_ms.max(100));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                autoscaler.evaluate(nodes.cluster_saturation(), Instant::now());
            }
        });
    }

    let listen_addr = config.listen_addr.clone();
    let state = Arc::new(AppState {
        nodes,
        router,
        autoscaler,
        proxy,
        validator,
        config,
        started_at: Instant::now(),
    });
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("binding {listen_addr}"))?;
    info!(%listen_addr, "control plane listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
