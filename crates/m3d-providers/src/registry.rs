//! Provider registry (§4.4): maps a `MeshProviderId` to its driver and
//! centralizes the download-format-fallback policy so no single driver has
//! to reimplement it.

use std::collections::HashMap;
use std::sync::Arc;

use m3d_api::provider::MeshDriver;
use m3d_types::error::ProviderError;
use m3d_types::pipeline::{DownloadFile, MeshFormat, MeshProviderId};

pub struct MeshProviderRegistry {
    drivers: HashMap<MeshProviderId, Arc<dyn MeshDriver>>,
}

impl MeshProviderRegistry {
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    pub fn register(&mut self, id: MeshProviderId, driver: Arc<dyn MeshDriver>) {
        self.drivers.insert(id, driver);
    }

    pub fn get(&self, id: MeshProviderId) -> Option<Arc<dyn MeshDriver>> {
        self.drivers.get(&id).cloned()
    }

    /// Flat credit cost for the given provider (§4.4 registry table),
    /// looked up from whichever driver is registered for it.
    pub fn cost(&self, id: MeshProviderId) -> Option<i64> {
        self.drivers.get(&id).map(|d| d.cost())
    }

    /// Requests the pipeline's configured format, falling back through
    /// `glb > fbx > obj > stl` on `NoMatchingFormat` (§4.4 download policy).
    /// Returns the format that actually matched alongside the files.
    pub async fn download_with_fallback(
        &self,
        id: MeshProviderId,
        handle: &m3d_api::provider::TaskHandle,
        preferred: MeshFormat,
    ) -> Result<(MeshFormat, Vec<DownloadFile>), ProviderError> {
        let driver = self
            .drivers
            .get(&id)
            .ok_or_else(|| ProviderError::Transport(format!("no driver registered for {id:?}")))?;

        let mut order: Vec<MeshFormat> = vec![preferred];
        order.extend(
            MeshFormat::PREFERENCE_ORDER
                .into_iter()
                .filter(|f| *f != preferred),
        );

        let mut last_err = ProviderError::NoMatchingFormat;
        for format in order {
            match driver.download(handle, format).await {
                Ok(files) if !files.is_empty() => return Ok((format, files)),
                Ok(_) => last_err = ProviderError::NoMatchingFormat,
                Err(ProviderError::NoMatchingFormat) => last_err = ProviderError::NoMatchingFormat,
                Err(other) => return Err(other),
            }
        }
        Err(last_err)
    }
}

impl Default for MeshProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use m3d_api::provider::{PollResult, TaskHandle};

    struct StubDriver {
        available: MeshFormat,
    }

    #[async_trait]
    impl MeshDriver for StubDriver {
        fn id(&self) -> &'static str {
            "stub"
        }
        fn cost(&self) -> i64 {
            5
        }
        async fn submit(
            &self,
            _image_urls: &[String],
            _options: &serde_json::Value,
        ) -> Result<TaskHandle, ProviderError> {
            unimplemented!()
        }
        async fn poll(&self, _handle: &TaskHandle) -> Result<PollResult, ProviderError> {
            unimplemented!()
        }
        async fn download(
            &self,
            _handle: &TaskHandle,
            required_format: MeshFormat,
        ) -> Result<Vec<DownloadFile>, ProviderError> {
            if required_format == self.available {
                Ok(vec![DownloadFile {
                    format: required_format,
                    url: "https://example.test/model".to_string(),
                    name: "model".to_string(),
                }])
            } else {
                Ok(vec![])
            }
        }
        async fn fetch_bytes(&self, _url: &str) -> Result<Vec<u8>, ProviderError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn falls_back_to_next_preferred_format_when_missing() {
        let mut registry = MeshProviderRegistry::new();
        registry.register(
            MeshProviderId::Meshy,
            Arc::new(StubDriver {
                available: MeshFormat::Obj,
            }),
        );

        let handle = TaskHandle {
            task_id: "t1".to_string(),
            subscription_key: None,
        };
        let (format, files) = registry
            .download_with_fallback(MeshProviderId::Meshy, &handle, MeshFormat::Glb)
            .await
            .unwrap();
        assert_eq!(format, MeshFormat::Obj);
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn no_matching_format_anywhere_errors() {
        let handle = TaskHandle {
            task_id: "t1".to_string(),
            subscription_key: None,
        };
        let mut empty_registry = MeshProviderRegistry::new();
        struct NeverDriver;
        #[async_trait]
        impl MeshDriver for NeverDriver {
            fn id(&self) -> &'static str {
                "never"
            }
            fn cost(&self) -> i64 {
                5
            }
            async fn submit(
                &self,
                _i: &[String],
                _o: &serde_json::Value,
            ) -> Result<TaskHandle, ProviderError> {
                unimplemented!()
            }
            async fn poll(&self, _h: &TaskHandle) -> Result<PollResult, ProviderError> {
                unimplemented!()
            }
            async fn download(
                &self,
                _h: &TaskHandle,
                _f: MeshFormat,
            ) -> Result<Vec<DownloadFile>, ProviderError> {
                Ok(vec![])
            }
            async fn fetch_bytes(&self, _u: &str) -> Result<Vec<u8>, ProviderError> {
                unimplemented!()
            }
        }
        empty_registry.register(MeshProviderId::Tripo, Arc::new(NeverDriver));
        let result = empty_registry
            .download_with_fallback(MeshProviderId::Tripo, &handle, MeshFormat::Glb)
            .await;
        assert!(matches!(result, Err(ProviderError::NoMatchingFormat)));
    }
}
