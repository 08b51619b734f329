//! C2 BlobStore adapter interface.

use async_trait::async_trait;
use m3d_types::error::StoreError;

/// Thin wrapper over object storage (§4.2). `path` is hierarchical and must
/// include the owning `userId` and `pipelineId` as prefix segments (§6 blob
/// layout). Returned URLs remain valid for at least seven days.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_bytes(&self, path: &str, bytes: Vec<u8>, mime: &str) -> Result<String, StoreError>;

    async fn put_base64(
        &self,
        path: &str,
        base64: &str,
        mime: &str,
    ) -> Result<String, StoreError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError>;
}
