//! Shared configuration structures (SPEC_FULL.md §B.3).
//!
//! §9's design note — "Globals for API keys and environment become an
//! explicit `Config{...}` passed in at construction" — is implemented here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pipeline::MeshProviderId;

/// Per-driver credit cost and option schema (§4.4: "part of the registry, not
/// hardcoded in the state machine").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub cost: i64,
    pub api_key: String,
    pub base_url: String,
}

fn default_provider_table() -> BTreeMap<MeshProviderId, ProviderConfig> {
    BTreeMap::new()
}

/// Top-level configuration loaded by `m3d-node` (TOML on disk, overridable by
/// environment variables per-field in the binary's CLI layer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub vision_api_key: String,
    pub vision_base_url: String,
    #[serde(default = "default_provider_table")]
    pub provider_keys: BTreeMap<MeshProviderId, ProviderConfig>,
    pub retexture_api_key: String,
    pub retexture_base_url: String,
    pub blob_store_endpoint: String,
    pub doc_store_endpoint: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_poll_interval_ms() -> u64 {
    3_000
}
