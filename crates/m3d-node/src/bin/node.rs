//! Binary entry point: wires concrete adapters into a [`PipelineEngine`] and
//! serves the C7 command API.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;

use m3d_api::{BlobStore, CreditLedger, DocStore, RetextureDriver, VisionClient};
use m3d_ledger::DocStoreLedger;
use m3d_pipeline::PipelineEngine;
use m3d_storage::{MemoryBlobStore, MemoryDocStore};
use m3d_types::config::Config;
use m3d_vision::{BackendVisionClient, HttpVisionBackend};

#[derive(Parser, Debug)]
#[command(name = "m3d-node", about = "Mesh pipeline kernel node")]
struct Opts {
    /// Path to the TOML configuration file.
    #[arg(long, env = "M3D_CONFIG", default_value = "m3d-node.toml")]
    config: PathBuf,
}

fn load_config(path: &PathBuf) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let mut config: Config = toml::from_str(&raw).context("parsing config as TOML")?;

    if let Ok(key) = std::env::var("M3D_VISION_API_KEY") {
        config.vision_api_key = key;
    }
    if let Ok(key) = std::env::var("M3D_RETEXTURE_API_KEY") {
        config.retexture_api_key = key;
    }
    if let Ok(addr) = std::env::var("M3D_LISTEN_ADDR") {
        config.listen_addr = addr;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    m3d_telemetry::init_tracing()?;
    let metrics = m3d_telemetry::install_metrics().context("installing prometheus collectors")?;

    let opts = Opts::parse();
    let config = load_config(&opts.config)?;

    // The real deployment's DocStore/BlobStore are an external document
    // database and object store (SPEC_FULL.md §1 Non-goals); this binary
    // wires the in-process reference adapters until those are available.
    let doc_store: Arc<dyn DocStore> = Arc::new(MemoryDocStore::new());
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new(config.blob_store_endpoint.clone()));
    let ledger: Arc<dyn CreditLedger> = Arc::new(DocStoreLedger::new(doc_store.clone()));

    let vision: Arc<dyn VisionClient> = Arc::new(BackendVisionClient::new(HttpVisionBackend::new(
        config.vision_base_url.clone(),
        config.vision_api_key.clone(),
        "gemini-2.0-flash-exp".to_string(),
    )));

    let provider_keys: HashMap<_, _> = config
        .provider_keys
        .iter()
        .map(|(id, cfg)| (*id, cfg.api_key.clone()))
        .collect();
    let mesh_providers = m3d_providers::build_registry(&provider_keys);
    let retexture: Arc<dyn RetextureDriver> =
        Arc::new(m3d_providers::MeshyRetextureDriver::new(config.retexture_api_key.clone()));

    let engine = Arc::new(PipelineEngine::new(doc_store, blobs, ledger, vision, mesh_providers, retexture));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let gateway_config = m3d_gateway::GatewayConfig {
        listen_addr: config.listen_addr.clone(),
        ..m3d_gateway::GatewayConfig::default()
    };

    tracing::info!(listen_addr = %config.listen_addr, "mesh pipeline kernel starting");
    m3d_gateway::run_server(gateway_config, engine, metrics, shutdown_rx).await
}
