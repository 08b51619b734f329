#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]
#![forbid(unsafe_code)]

//! C3 provider drivers and registry (§4.4).

pub mod http;
pub mod hunyuan;
pub mod meshy;
pub mod registry;
pub mod retexture;
pub mod rodin;
pub mod tripo;

pub use hunyuan::HunyuanDriver;
pub use meshy::MeshyDriver;
pub use registry::MeshProviderRegistry;
pub use retexture::MeshyRetextureDriver;
pub use rodin::RodinDriver;
pub use tripo::TripoDriver;

use std::sync::Arc;

use m3d_types::pipeline::MeshProviderId;

/// Builds a registry wired with one driver per provider key, keyed by
/// `MeshProviderId` (§4.4 registry table). Each key may be absent if the
/// corresponding environment variable was not configured.
pub fn build_registry(
    keys: &std::collections::HashMap<MeshProviderId, String>,
) -> MeshProviderRegistry {
    let mut registry = MeshProviderRegistry::new();
    if let Some(key) = keys.get(&MeshProviderId::Meshy) {
        registry.register(MeshProviderId::Meshy, Arc::new(MeshyDriver::new(key.clone())));
    }
    if let Some(key) = keys.get(&MeshProviderId::Tripo) {
        registry.register(MeshProviderId::Tripo, Arc::new(TripoDriver::new(key.clone())));
    }
    if let Some(key) = keys.get(&MeshProviderId::Hunyuan) {
        registry.register(
            MeshProviderId::Hunyuan,
            Arc::new(HunyuanDriver::new(key.clone())),
        );
    }
    if let Some(key) = keys.get(&MeshProviderId::Rodin) {
        registry.register(MeshProviderId::Rodin, Arc::new(RodinDriver::new(key.clone())));
    }
    registry
}
