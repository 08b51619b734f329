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

//! C6 status poller (§4.6, §5): enforces the "no faster than once every
//! `poll_interval_ms` per Pipeline" floor in front of [`PipelineEngine::check_status`],
//! and is the natural place a background driver loop calls into once per tick
//! for every in-flight Pipeline it knows about.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use m3d_pipeline::PipelineEngine;
use m3d_telemetry::Metrics;
use m3d_types::error::PipelineError;
use m3d_types::pipeline::{Pipeline, PipelineStatus};

/// §5: checkStatus on a single Pipeline must not be called more often than
/// this, regardless of how eager the caller's own loop is.
pub const DEFAULT_MIN_POLL_INTERVAL_MS: u64 = 3_000;

/// Guards [`PipelineEngine::check_status`] behind a per-pipeline cadence
/// floor, mirroring the way the kernel's driver loop throttles per-validator
/// RPC fan-out rather than trusting callers to self-limit.
pub struct StatusPoller {
    engine: Arc<PipelineEngine>,
    metrics: Option<Metrics>,
    min_interval: Duration,
    last_polled: DashMap<String, Instant>,
}

/// The outcome of one [`StatusPoller::poll`] call: either the cadence floor
/// held the call back, or the engine was actually invoked.
#[derive(Debug)]
pub enum PollOutcome {
    /// Too soon since the last poll; the Pipeline was returned unchanged.
    Throttled(Pipeline),
    Polled(Pipeline),
}

impl PollOutcome {
    pub fn into_pipeline(self) -> Pipeline {
        match self {
            PollOutcome::Throttled(p) | PollOutcome::Polled(p) => p,
        }
    }
}

impl StatusPoller {
    pub fn new(engine: Arc<PipelineEngine>) -> Self {
        Self {
            engine,
            metrics: None,
            min_interval: Duration::from_millis(DEFAULT_MIN_POLL_INTERVAL_MS),
            last_polled: DashMap::new(),
        }
    }

    pub fn with_min_interval_ms(mut self, ms: u64) -> Self {
        self.min_interval = Duration::from_millis(ms);
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Polls a single Pipeline's status if the cadence floor allows it.
    /// `caller` must own the Pipeline, exactly as with every other engine
    /// command.
    pub async fn poll(&self, pipeline_id: &str, caller: &str) -> Result<PollOutcome, PipelineError> {
        if let Some(last) = self.last_polled.get(pipeline_id) {
            if last.elapsed() < self.min_interval {
                let current = self.engine.get_pipeline(pipeline_id, caller).await?;
                return Ok(PollOutcome::Throttled(current));
            }
        }
        self.last_polled.insert(pipeline_id.to_string(), Instant::now());

        let result = self.engine.check_status(pipeline_id, caller).await;
        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(p) => metrics.inc_provider_call("poller", "check_status", outcome_label(p)),
                Err(_) => metrics.inc_provider_call("poller", "check_status", "error"),
            }
        }
        result.map(PollOutcome::Polled)
    }

    /// Drops any cadence bookkeeping for a Pipeline, e.g. once it reaches a
    /// terminal status and will never be polled again.
    pub fn forget(&self, pipeline_id: &str) {
        self.last_polled.remove(pipeline_id);
    }

    /// Sweeps `ids`, polling each that is due and skipping the rest, the
    /// shape a driver loop's single tick takes over every Pipeline it is
    /// tracking (§4.6: "a background loop, not per-request").
    pub async fn sweep(&self, ids: impl IntoIterator<Item = (String, String)>) -> Vec<Result<PollOutcome, PipelineError>> {
        let mut results = Vec::new();
        for (pipeline_id, caller) in ids {
            results.push(self.poll(&pipeline_id, &caller).await);
        }
        results
    }
}

fn outcome_label(p: &Pipeline) -> &'static str {
    match p.status {
        PipelineStatus::MeshReady | PipelineStatus::Completed => "ready",
        PipelineStatus::Failed => "failed",
        _ => "pending",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use m3d_api::provider::{MeshDriver, PollResult, TaskHandle, TaskState};
    use m3d_api::{BlobStore, CreditLedger, DocStore, RetextureDriver, RetextureOptions, VisionClient};
    use m3d_ledger::DocStoreLedger;
    use m3d_providers::MeshProviderRegistry;
    use m3d_storage::{MemoryBlobStore, MemoryDocStore};
    use m3d_types::error::ProviderError;
    use m3d_types::pipeline::{DownloadFile, MeshFormat, MeshProviderId, PrinterType, ProcessingMode, Style};
    use m3d_vision::{BackendVisionClient, MockVisionBackend};

    struct AlwaysRunningDriver;

    #[async_trait]
    impl MeshDriver for AlwaysRunningDriver {
        fn id(&self) -> &'static str {
            "meshy"
        }
        fn cost(&self) -> i64 {
            5
        }
        async fn submit(&self, _: &[String], _: &serde_json::Value) -> Result<TaskHandle, ProviderError> {
            Ok(TaskHandle {
                task_id: "task-1".to_string(),
                subscription_key: None,
            })
        }
        async fn poll(&self, _: &TaskHandle) -> Result<PollResult, ProviderError> {
            Ok(PollResult {
                state: TaskState::Running,
                progress: None,
                failure_reason: None,
            })
        }
        async fn download(&self, _: &TaskHandle, _: MeshFormat) -> Result<Vec<DownloadFile>, ProviderError> {
            Ok(vec![])
        }
        async fn fetch_bytes(&self, _: &str) -> Result<Vec<u8>, ProviderError> {
            Ok(vec![])
        }
    }

    struct UnusedRetextureDriver;

    #[async_trait]
    impl RetextureDriver for UnusedRetextureDriver {
        async fn submit_from_mesh(&self, _: &str, _: RetextureOptions) -> Result<TaskHandle, ProviderError> {
            unreachable!("not exercised by this test")
        }
        async fn poll(&self, _: &TaskHandle) -> Result<PollResult, ProviderError> {
            unreachable!("not exercised by this test")
        }
        async fn download(&self, _: &TaskHandle) -> Result<Vec<DownloadFile>, ProviderError> {
            unreachable!("not exercised by this test")
        }
        async fn fetch_bytes(&self, _: &str) -> Result<Vec<u8>, ProviderError> {
            unreachable!("not exercised by this test")
        }
    }

    async fn build_engine() -> (Arc<PipelineEngine>, Pipeline) {
        let store = Arc::new(MemoryDocStore::new());
        store.seed_account("u1", 100).await;
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::default());
        blobs
            .put_bytes("uploads/u1/ref.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap();
        let doc_store: Arc<dyn DocStore> = store.clone();
        let ledger: Arc<dyn CreditLedger> = Arc::new(DocStoreLedger::new(doc_store.clone()));
        let vision: Arc<dyn VisionClient> = Arc::new(BackendVisionClient::new(MockVisionBackend::default()));
        let mut registry = MeshProviderRegistry::new();
        registry.register(MeshProviderId::Meshy, Arc::new(AlwaysRunningDriver));
        let retexture: Arc<dyn RetextureDriver> = Arc::new(UnusedRetextureDriver);
        let engine = Arc::new(PipelineEngine::new(doc_store, blobs, ledger, vision, registry, retexture));

        let settings = m3d_types::pipeline::PipelineSettings {
            quality: "standard".to_string(),
            printer_type: PrinterType::Fdm,
            format: MeshFormat::Glb,
            provider: None,
            provider_options: serde_json::json!({}),
            generation_mode: "figurine".to_string(),
            selected_style: Style::Chibi,
            color_count: 3,
            gemini_model: "gemini-2.0-flash-exp".to_string(),
        };
        let p = engine
            .create("u1", vec!["uploads/u1/ref.png".to_string()], settings, ProcessingMode::Realtime, None)
            .await
            .unwrap();
        engine.analyze(&p.id, "u1", "en-US").await.unwrap();
        let p = engine.generate_views(&p.id, "u1").await.unwrap();
        let p = engine
            .start_mesh(&p.id, "u1", MeshProviderId::Meshy, serde_json::json!({}))
            .await
            .unwrap();
        (engine, p)
    }

    #[tokio::test(start_paused = true)]
    async fn second_poll_within_the_floor_is_throttled() {
        let (engine, p) = build_engine().await;
        let poller = StatusPoller::new(engine).with_min_interval_ms(3_000);

        let first = poller.poll(&p.id, "u1").await.unwrap();
        assert!(matches!(first, PollOutcome::Polled(_)));

        let second = poller.poll(&p.id, "u1").await.unwrap();
        assert!(matches!(second, PollOutcome::Throttled(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_after_the_floor_elapses_reaches_the_engine() {
        let (engine, p) = build_engine().await;
        let poller = StatusPoller::new(engine).with_min_interval_ms(3_000);

        poller.poll(&p.id, "u1").await.unwrap();
        tokio::time::advance(Duration::from_millis(3_001)).await;
        let second = poller.poll(&p.id, "u1").await.unwrap();
        assert!(matches!(second, PollOutcome::Polled(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_polls_each_distinct_pipeline_once() {
        let (engine, p) = build_engine().await;
        let poller = StatusPoller::new(engine);
        let ids: Vec<(String, String)> = std::iter::once((p.id.clone(), "u1".to_string())).collect();
        let results = poller.sweep(ids).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
    }
}
