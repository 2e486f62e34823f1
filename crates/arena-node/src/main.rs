// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Arena engine node binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arena_auth::{KeyMaterial, TokenValidator, ValidationMode};
use arena_config::sections::{AuthConfig, EngineConfig, NodeServiceConfig};
use arena_config::{ConfigService, FsConfigStore};
use arena_node::register::ClusterLink;
use arena_node::{default_library, http, NodeState};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "arena-node", about = "Arena engine node")]
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
    let mut node_config: NodeServiceConfig = configs.load_or_init("node")?;
    if let Some(listen) = args.listen {
        node_config.listen_addr = listen;
    }
    let engine: EngineConfig = configs.load_or_init("engine")?;
    let auth: AuthConfig = configs.load_or_init("auth")?;

    let validator = Arc::new(build_validator(&auth)?);
    let state = NodeState::new(
        default_library(),
        engine,
        node_config.clone(),
        validator,
    );

    let link = ClusterLink::new(&node_config, &auth);
    if let Some(link) = &link {
        tokio::spawn(Arc::clone(link).run(Arc::clone(&state)));
    }

    let app = http::router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&node_config.listen_addr)
        .await
        .with_context(|| format!("binding {}", node_config.listen_addr))?;
    info!(listen_addr = %node_config.listen_addr, "engine node listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    // Shutdown: stop containers (cancelling tick schedulers, failing
    // queued commands) and leave the cluster.
    state.stop_all();
    if let Some(link) = &link {
        link.deregister().await;
    }
    info!("engine node stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
