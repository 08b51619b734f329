//! In-process reference implementation of the `BlobStore` adapter (C2).

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::collections::HashMap;
use tokio::sync::Mutex;

use m3d_api::blob_store::BlobStore;
use m3d_types::error::StoreError;

struct StoredBlob {
    bytes: Vec<u8>,
    #[allow(dead_code)]
    mime: String,
}

/// Stands in for the real object-storage client; returns synthetic
/// `mem://{path}` URLs. Real implementations must ensure returned URLs stay
/// valid for at least seven days (§4.2) — a constraint this in-memory
/// adapter trivially satisfies by never expiring anything.
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, StoredBlob>>,
    url_prefix: String,
}

impl MemoryBlobStore {
    pub fn new(url_prefix: impl Into<String>) -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            url_prefix: url_prefix.into(),
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.url_prefix.trim_end_matches('/'), path)
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new("mem://blobs")
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_bytes(
        &self,
        path: &str,
        bytes: Vec<u8>,
        mime: &str,
    ) -> Result<String, StoreError> {
        let mut blobs = self.blobs.lock().await;
        blobs.insert(
            path.to_string(),
            StoredBlob {
                bytes,
                mime: mime.to_string(),
            },
        );
        Ok(self.url_for(path))
    }

    async fn put_base64(
        &self,
        path: &str,
        base64: &str,
        mime: &str,
    ) -> Result<String, StoreError> {
        let bytes = BASE64
            .decode(base64)
            .map_err(|e| StoreError::Backend(format!("invalid base64: {e}")))?;
        self.put_bytes(path, bytes, mime).await
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let blobs = self.blobs.lock().await;
        blobs
            .get(path)
            .map(|b| b.bytes.clone())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }
}
