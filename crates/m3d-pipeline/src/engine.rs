//! C5 pipeline state machine (§4.5). Every public method here is exactly one
//! row of the transition table. A method returns `Err` only when the command
//! never reaches a transition at all (bad ownership, a precondition the
//! caller could not have satisfied, insufficient credits). Once a transition
//! has begun — credits debited, a provider call made — any downstream
//! failure resolves into a `failed` Pipeline and comes back as `Ok`, the same
//! way `onPoll(failed)` is a normal event rather than a Rust error.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use m3d_api::{BlobStore, CreditLedger, DocStore, RetextureDriver, RetextureOptions, VisionClient};
use m3d_api::provider::{TaskHandle, TaskState};
use m3d_classifier::classify;
use m3d_providers::MeshProviderRegistry;
use m3d_types::error::{PipelineError, ProviderError, StoreError};
use m3d_types::pipeline::{
    Angle, CreditsCharged, DownloadFile, ErrorStep, GenerationProgress, ImageSource, MeshFormat,
    MeshProviderId, Pipeline, PipelineSettings, PipelineStatus, ProcessedImage, ProcessingMode,
    ProgressPhase, ResetTarget, Style, MAX_DOWNLOAD_RETRIES, MAX_REGENERATIONS, TEXTURE_COST,
};

use crate::costs::views_cost;
use crate::validation;

/// A user-supplied correction to a just-computed analysis, while the
/// Pipeline is still in `draft` (§4.7 `updatePipelineAnalysis`).
#[derive(Debug, Clone, Default)]
pub struct AnalysisPatch {
    pub description: Option<String>,
    pub color_palette: Option<Vec<String>>,
    pub selected_style: Option<Style>,
}

pub struct PipelineEngine {
    store: Arc<dyn DocStore>,
    blobs: Arc<dyn BlobStore>,
    ledger: Arc<dyn CreditLedger>,
    vision: Arc<dyn VisionClient>,
    mesh_providers: MeshProviderRegistry,
    retexture: Arc<dyn RetextureDriver>,
}

fn mime_extension(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    }
}

fn clear_mesh_outputs(p: &mut Pipeline) {
    p.settings.provider = None;
    p.provider_task_id = None;
    p.provider_subscription_key = None;
    p.mesh_url = None;
    p.mesh_storage_path = None;
    p.mesh_download_files.clear();
    p.mesh_format = None;
    p.credits_charged.mesh = 0;
    p.download_retry_count = 0;
}

fn clear_texture_outputs(p: &mut Pipeline) {
    p.texture_task_id = None;
    p.textured_model_url = None;
    p.textured_model_storage_path = None;
    p.completed_at = None;
    p.credits_charged.texture = 0;
}

fn can_generate_views(p: &Pipeline) -> bool {
    matches!(p.status, PipelineStatus::Draft | PipelineStatus::ImagesReady)
        || (p.status == PipelineStatus::Failed && p.error_step == Some(ErrorStep::GeneratingImages))
}

impl PipelineEngine {
    pub fn new(
        store: Arc<dyn DocStore>,
        blobs: Arc<dyn BlobStore>,
        ledger: Arc<dyn CreditLedger>,
        vision: Arc<dyn VisionClient>,
        mesh_providers: MeshProviderRegistry,
        retexture: Arc<dyn RetextureDriver>,
    ) -> Self {
        Self {
            store,
            blobs,
            ledger,
            vision,
            mesh_providers,
            retexture,
        }
    }

    /// Reloads the Pipeline fresh, applies `apply`, and writes it back under
    /// an optimistic concurrency check (§5: "retry once on conflict"). `apply`
    /// re-validates whatever precondition it represents against the freshly
    /// loaded record, so a concurrent writer that invalidates the precondition
    /// between our read and our write is caught on the retried attempt rather
    /// than silently overwritten.
    async fn commit_with_retry<F>(&self, pipeline_id: &str, mut apply: F) -> Result<Pipeline, PipelineError>
    where
        F: FnMut(&mut Pipeline) -> Result<(), PipelineError>,
    {
        let mut retried = false;
        loop {
            let mut current = self.store.get_pipeline(pipeline_id).await?;
            let expected_version = current.version;
            apply(&mut current)?;
            current.updated_at = Utc::now();
            match self.store.update_pipeline(current.clone(), expected_version).await {
                Ok(()) => {
                    current.version = expected_version + 1;
                    return Ok(current);
                }
                Err(StoreError::Conflict(_)) if !retried => {
                    retried = true;
                    tracing::debug!(pipeline_id, "optimistic concurrency conflict, retrying once");
                    continue;
                }
                Err(e) => return Err(PipelineError::Store(e)),
            }
        }
    }

    async fn load_owned(&self, pipeline_id: &str, caller: &str) -> Result<Pipeline, PipelineError> {
        let pipeline = self.store.get_pipeline(pipeline_id).await?;
        if pipeline.user_id != caller {
            return Err(PipelineError::PermissionDenied(format!(
                "pipeline {pipeline_id} is not owned by {caller}"
            )));
        }
        Ok(pipeline)
    }

    /// Refunds `cost`, classifies `err` into the persisted record, and
    /// transitions the Pipeline to `failed`. Shared by every `generating-*`
    /// step's failure path (§4.8).
    async fn fail_step(
        &self,
        pipeline_id: &str,
        caller: &str,
        cost: i64,
        step: ErrorStep,
        err: PipelineError,
    ) -> Result<Pipeline, PipelineError> {
        if cost > 0 {
            if let Err(e) = self.ledger.refund_credits(caller, cost, pipeline_id).await {
                tracing::error!(pipeline_id, error = %e, "failed to refund credits after a failed step");
            }
        }
        let record = classify(&err).to_record();
        self.commit_with_retry(pipeline_id, move |p| {
            p.status = PipelineStatus::Failed;
            p.error = Some(record.clone());
            p.error_step = Some(step);
            match step {
                ErrorStep::GeneratingImages => p.credits_charged.views = 0,
                ErrorStep::GeneratingMesh => p.credits_charged.mesh = 0,
                ErrorStep::GeneratingTexture => p.credits_charged.texture = 0,
            }
            Ok(())
        })
        .await
    }

    /// If the provider reported success but no file matched the preferred
    /// format list, stay in the current step and bump `downloadRetryCount`;
    /// exceeding `MAX_DOWNLOAD_RETRIES` fails the step (§4.6).
    async fn bump_download_retry_or_fail(
        &self,
        pipeline_id: &str,
        caller: &str,
        snapshot: &Pipeline,
        step: ErrorStep,
    ) -> Result<Pipeline, PipelineError> {
        let next_count = snapshot.download_retry_count + 1;
        if next_count >= MAX_DOWNLOAD_RETRIES {
            let cost = match step {
                ErrorStep::GeneratingMesh => snapshot.credits_charged.mesh,
                ErrorStep::GeneratingTexture => snapshot.credits_charged.texture,
                ErrorStep::GeneratingImages => snapshot.credits_charged.views,
            };
            return self
                .fail_step(pipeline_id, caller, cost, step, PipelineError::Provider(ProviderError::NoMatchingFormat))
                .await;
        }
        tracing::info!(pipeline_id, next_count, "download retry: no matching format yet");
        self.commit_with_retry(pipeline_id, move |p| {
            p.download_retry_count = next_count;
            Ok(())
        })
        .await
    }

    pub async fn get_pipeline(&self, pipeline_id: &str, caller: &str) -> Result<Pipeline, PipelineError> {
        self.load_owned(pipeline_id, caller).await
    }

    pub async fn list_pipelines(
        &self,
        caller: &str,
        status: Option<PipelineStatus>,
        limit: usize,
    ) -> Result<Vec<Pipeline>, PipelineError> {
        Ok(self.store.list_pipelines(caller, status, limit.min(50)).await?)
    }

    pub async fn create(
        &self,
        user_id: &str,
        input_images: Vec<String>,
        settings: PipelineSettings,
        processing_mode: ProcessingMode,
        user_description: Option<String>,
    ) -> Result<Pipeline, PipelineError> {
        validation::validate_input_images(&input_images)?;
        validation::validate_color_count(settings.color_count)?;
        if let Some(desc) = &user_description {
            validation::validate_user_description(desc)?;
        }

        let now = Utc::now();
        let pipeline = Pipeline {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            status: PipelineStatus::Draft,
            processing_mode,
            generation_mode: settings.generation_mode.clone(),
            input_images,
            image_analysis: None,
            user_description,
            mesh_images: BTreeMap::new(),
            aggregated_color_palette: None,
            settings,
            provider_task_id: None,
            provider_subscription_key: None,
            mesh_url: None,
            mesh_storage_path: None,
            mesh_format: None,
            mesh_download_files: Vec::new(),
            texture_task_id: None,
            textured_model_url: None,
            textured_model_storage_path: None,
            credits_charged: CreditsCharged::default(),
            regenerations_used: 0,
            generation_progress: GenerationProgress::default(),
            download_retry_count: 0,
            error: None,
            error_step: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            version: 0,
        };
        self.store.create_pipeline(pipeline.clone()).await?;
        Ok(pipeline)
    }

    pub async fn analyze(&self, pipeline_id: &str, caller: &str, locale: &str) -> Result<Pipeline, PipelineError> {
        let snapshot = self.load_owned(pipeline_id, caller).await?;
        if snapshot.status != PipelineStatus::Draft {
            return Err(PipelineError::FailedPrecondition(
                "analyze is only valid while the pipeline is in draft".to_string(),
            ));
        }
        let ref_path = snapshot
            .input_images
            .first()
            .ok_or_else(|| PipelineError::FailedPrecondition("pipeline has no input image".to_string()))?;
        let ref_bytes = self.blobs.get(ref_path).await.map_err(PipelineError::Store)?;

        let analysis = self
            .vision
            .analyze_image(
                &ref_bytes,
                snapshot.settings.color_count,
                snapshot.settings.printer_type,
                locale,
                snapshot.settings.selected_style,
            )
            .await
            .map_err(PipelineError::Vision)?;

        self.commit_with_retry(pipeline_id, move |p| {
            if p.status != PipelineStatus::Draft {
                return Err(PipelineError::FailedPrecondition(
                    "analyze is only valid while the pipeline is in draft".to_string(),
                ));
            }
            p.image_analysis = Some(analysis.clone());
            Ok(())
        })
        .await
    }

    pub async fn update_pipeline_analysis(
        &self,
        pipeline_id: &str,
        caller: &str,
        patch: AnalysisPatch,
    ) -> Result<Pipeline, PipelineError> {
        if let Some(colors) = &patch.color_palette {
            validation::validate_color_count(colors.len() as u8)?;
        }
        if let Some(desc) = &patch.description {
            validation::validate_user_description(desc)?;
        }

        let snapshot = self.load_owned(pipeline_id, caller).await?;
        if snapshot.status != PipelineStatus::Draft {
            return Err(PipelineError::FailedPrecondition(
                "updatePipelineAnalysis is draft-only".to_string(),
            ));
        }
        if snapshot.image_analysis.is_none() {
            return Err(PipelineError::FailedPrecondition(
                "analyze must run before updatePipelineAnalysis".to_string(),
            ));
        }

        self.commit_with_retry(pipeline_id, move |p| {
            if p.status != PipelineStatus::Draft {
                return Err(PipelineError::FailedPrecondition(
                    "updatePipelineAnalysis is draft-only".to_string(),
                ));
            }
            let analysis = p
                .image_analysis
                .as_mut()
                .ok_or_else(|| PipelineError::FailedPrecondition("no analysis attached".to_string()))?;
            if let Some(desc) = &patch.description {
                analysis.description = desc.clone();
            }
            if let Some(colors) = &patch.color_palette {
                analysis.color_palette = colors.clone();
            }
            if let Some(style) = patch.selected_style {
                p.settings.selected_style = style;
            }
            Ok(())
        })
        .await
    }

    pub async fn generate_views(&self, pipeline_id: &str, caller: &str) -> Result<Pipeline, PipelineError> {
        let snapshot = self.load_owned(pipeline_id, caller).await?;
        if !can_generate_views(&snapshot) {
            return Err(PipelineError::FailedPrecondition(
                "generateViews is not valid from the current status".to_string(),
            ));
        }
        let analysis = snapshot.image_analysis.clone().ok_or_else(|| {
            PipelineError::FailedPrecondition("analyze must run before generateViews".to_string())
        })?;
        let cost = views_cost(&snapshot.settings.gemini_model);
        self.ledger.deduct_credits(caller, cost, pipeline_id).await?;

        let entered = match self
            .commit_with_retry(pipeline_id, move |p| {
                if !can_generate_views(p) {
                    return Err(PipelineError::FailedPrecondition(
                        "generateViews is not valid from the current status".to_string(),
                    ));
                }
                p.status = PipelineStatus::GeneratingImages;
                p.error = None;
                p.error_step = None;
                p.credits_charged.views = cost;
                Ok(())
            })
            .await
        {
            Ok(p) => p,
            Err(e) => {
                if let Err(refund_err) = self.ledger.refund_credits(caller, cost, pipeline_id).await {
                    tracing::error!(pipeline_id, error = %refund_err, "failed to refund after a rejected entry");
                }
                return Err(e);
            }
        };

        let ref_path = match entered.input_images.first() {
            Some(path) => path.clone(),
            None => {
                return self
                    .fail_step(
                        pipeline_id,
                        caller,
                        cost,
                        ErrorStep::GeneratingImages,
                        PipelineError::FailedPrecondition("pipeline has no input image".to_string()),
                    )
                    .await
            }
        };
        let ref_bytes = match self.blobs.get(&ref_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return self
                    .fail_step(pipeline_id, caller, cost, ErrorStep::GeneratingImages, PipelineError::Store(e))
                    .await
            }
        };

        let fan_out = self
            .vision
            .generate_all_views_parallel(
                &ref_bytes,
                "image/png",
                entered.user_description.as_deref(),
                Some(&analysis.color_palette),
                entered.settings.selected_style,
                None,
            )
            .await;

        let all_views = match fan_out {
            Ok(v) => v,
            Err(e) => {
                return self
                    .fail_step(pipeline_id, caller, cost, ErrorStep::GeneratingImages, PipelineError::Vision(e))
                    .await
            }
        };

        let mut mesh_images = BTreeMap::new();
        for view in all_views.views {
            let ext = mime_extension(&view.mime_type);
            let path = format!(
                "pipelines/{}/{}/mesh_{}.{}",
                entered.user_id,
                pipeline_id,
                view.angle.as_str(),
                ext
            );
            let url = match self.blobs.put_bytes(&path, view.image_bytes, &view.mime_type).await {
                Ok(u) => u,
                Err(e) => {
                    return self
                        .fail_step(pipeline_id, caller, cost, ErrorStep::GeneratingImages, PipelineError::Store(e))
                        .await
                }
            };
            mesh_images.insert(
                view.angle,
                ProcessedImage {
                    url,
                    storage_path: path,
                    source: ImageSource::Ai,
                    color_palette: Some(view.color_palette),
                    generated_at: Utc::now(),
                },
            );
        }

        let palette_inputs: Vec<(Angle, Vec<String>)> = mesh_images
            .iter()
            .map(|(angle, img)| (*angle, img.color_palette.clone().unwrap_or_default()))
            .collect();
        let aggregated = m3d_vision::palette::aggregate(&palette_inputs);

        self.commit_with_retry(pipeline_id, move |p| {
            p.status = PipelineStatus::ImagesReady;
            p.mesh_images = mesh_images.clone();
            p.aggregated_color_palette = Some(aggregated.clone());
            p.generation_progress = GenerationProgress {
                phase: ProgressPhase::Complete,
                mesh_views_completed: 4,
            };
            Ok(())
        })
        .await
    }

    pub async fn regenerate_view(
        &self,
        pipeline_id: &str,
        caller: &str,
        angle: Angle,
        hint: Option<String>,
    ) -> Result<Pipeline, PipelineError> {
        let snapshot = self.load_owned(pipeline_id, caller).await?;
        if snapshot.status != PipelineStatus::ImagesReady {
            return Err(PipelineError::FailedPrecondition(
                "regenerateView is only valid from images-ready".to_string(),
            ));
        }
        if snapshot.regenerations_used >= MAX_REGENERATIONS {
            return Err(PipelineError::ResourceExhausted(format!(
                "regenerationsUsed already at the cap of {MAX_REGENERATIONS}"
            )));
        }
        let ref_path = snapshot
            .input_images
            .first()
            .ok_or_else(|| PipelineError::FailedPrecondition("pipeline has no input image".to_string()))?;
        let ref_bytes = self.blobs.get(ref_path).await.map_err(PipelineError::Store)?;
        let palette = snapshot
            .aggregated_color_palette
            .as_ref()
            .map(|p| p.unified.clone())
            .unwrap_or_default();

        let view = self
            .vision
            .generate_mesh_view(
                &ref_bytes,
                "image/png",
                angle,
                snapshot.user_description.as_deref(),
                Some(&palette),
                snapshot.settings.selected_style,
                hint.as_deref(),
            )
            .await
            .map_err(PipelineError::Vision)?;

        let ext = mime_extension(&view.mime_type);
        let path = format!(
            "pipelines/{}/{}/mesh_{}.{}",
            snapshot.user_id,
            pipeline_id,
            angle.as_str(),
            ext
        );
        let url = self
            .blobs
            .put_bytes(&path, view.image_bytes, &view.mime_type)
            .await
            .map_err(PipelineError::Store)?;
        let replaced = ProcessedImage {
            url,
            storage_path: path,
            source: ImageSource::Ai,
            color_palette: Some(view.color_palette),
            generated_at: Utc::now(),
        };

        self.commit_with_retry(pipeline_id, move |p| {
            if p.status != PipelineStatus::ImagesReady {
                return Err(PipelineError::FailedPrecondition(
                    "regenerateView is only valid from images-ready".to_string(),
                ));
            }
            if p.regenerations_used >= MAX_REGENERATIONS {
                return Err(PipelineError::ResourceExhausted(format!(
                    "regenerationsUsed already at the cap of {MAX_REGENERATIONS}"
                )));
            }
            p.mesh_images.insert(angle, replaced.clone());
            p.regenerations_used += 1;
            let palette_inputs: Vec<(Angle, Vec<String>)> = p
                .mesh_images
                .iter()
                .map(|(a, img)| (*a, img.color_palette.clone().unwrap_or_default()))
                .collect();
            p.aggregated_color_palette = Some(m3d_vision::palette::aggregate(&palette_inputs));
            Ok(())
        })
        .await
    }

    pub async fn start_mesh(
        &self,
        pipeline_id: &str,
        caller: &str,
        provider: MeshProviderId,
        provider_options: serde_json::Value,
    ) -> Result<Pipeline, PipelineError> {
        let snapshot = self.load_owned(pipeline_id, caller).await?;
        let resuming_failed =
            snapshot.status == PipelineStatus::Failed && snapshot.error_step == Some(ErrorStep::GeneratingMesh);
        if !(snapshot.status == PipelineStatus::ImagesReady || resuming_failed) {
            return Err(PipelineError::FailedPrecondition(
                "startMesh is only valid from images-ready or a failed mesh step".to_string(),
            ));
        }
        if Angle::ALL.iter().any(|a| !snapshot.mesh_images.contains_key(a)) {
            return Err(PipelineError::FailedPrecondition(
                "all four mesh views must be generated before startMesh".to_string(),
            ));
        }
        if let Some(existing) = snapshot.settings.provider {
            if existing != provider {
                return Err(PipelineError::InvalidArgument(format!(
                    "pipeline was already submitted to {}; a retry must use the same provider",
                    existing.as_str()
                )));
            }
        }
        let driver = self.mesh_providers.get(provider).ok_or_else(|| {
            PipelineError::FailedPrecondition(format!("no driver registered for provider {}", provider.as_str()))
        })?;
        let cost = driver.cost();

        self.ledger.deduct_credits(caller, cost, pipeline_id).await?;

        let image_urls: Vec<String> = Angle::ALL
            .iter()
            .filter_map(|a| snapshot.mesh_images.get(a).map(|img| img.url.clone()))
            .collect();
        let handle = match driver.submit(&image_urls, &provider_options).await {
            Ok(h) => h,
            Err(e) => {
                return self
                    .fail_step(pipeline_id, caller, cost, ErrorStep::GeneratingMesh, PipelineError::Provider(e))
                    .await
            }
        };

        self.commit_with_retry(pipeline_id, move |p| {
            p.status = PipelineStatus::GeneratingMesh;
            p.error = None;
            p.error_step = None;
            p.settings.provider = Some(provider);
            p.settings.provider_options = provider_options.clone();
            p.provider_task_id = Some(handle.task_id.clone());
            p.provider_subscription_key = handle.subscription_key.clone();
            p.credits_charged.mesh = cost;
            p.download_retry_count = 0;
            Ok(())
        })
        .await
    }

    /// `checkStatus` (§4.7): one poll, dispatched to the mesh or texture stage
    /// depending on which `generating-*` status the Pipeline is currently in.
    pub async fn check_status(&self, pipeline_id: &str, caller: &str) -> Result<Pipeline, PipelineError> {
        let snapshot = self.load_owned(pipeline_id, caller).await?;
        match snapshot.status {
            PipelineStatus::GeneratingMesh => self.poll_mesh(pipeline_id, caller, &snapshot).await,
            PipelineStatus::GeneratingTexture => self.poll_texture(pipeline_id, caller, &snapshot).await,
            _ => Err(PipelineError::FailedPrecondition(
                "checkStatus is only valid while generating a mesh or texture".to_string(),
            )),
        }
    }

    async fn poll_mesh(&self, pipeline_id: &str, caller: &str, snapshot: &Pipeline) -> Result<Pipeline, PipelineError> {
        let provider = snapshot
            .settings
            .provider
            .ok_or_else(|| PipelineError::FailedPrecondition("no mesh provider recorded".to_string()))?;
        let task_id = snapshot
            .provider_task_id
            .clone()
            .ok_or_else(|| PipelineError::FailedPrecondition("no mesh task id recorded".to_string()))?;
        let driver = self.mesh_providers.get(provider).ok_or_else(|| {
            PipelineError::FailedPrecondition(format!("no driver registered for {}", provider.as_str()))
        })?;
        let handle = TaskHandle {
            task_id,
            subscription_key: snapshot.provider_subscription_key.clone(),
        };
        let poll = driver.poll(&handle).await.map_err(PipelineError::Provider)?;

        match poll.state {
            TaskState::Queued | TaskState::Running => Ok(snapshot.clone()),
            TaskState::Succeeded => {
                let preferred = snapshot.settings.format;
                match self.mesh_providers.download_with_fallback(provider, &handle, preferred).await {
                    Ok((format, files)) => {
                        let primary = files
                            .first()
                            .cloned()
                            .ok_or(ProviderError::NoMatchingFormat)
                            .map_err(PipelineError::Provider)?;
                        let bytes = driver.fetch_bytes(&primary.url).await.map_err(PipelineError::Provider)?;
                        let path = format!(
                            "pipelines/{}/{}/mesh.{}",
                            snapshot.user_id,
                            pipeline_id,
                            format.as_str()
                        );
                        let url = self
                            .blobs
                            .put_bytes(&path, bytes, format.content_type())
                            .await
                            .map_err(PipelineError::Store)?;
                        let result = self
                            .commit_with_retry(pipeline_id, move |p| {
                                p.status = PipelineStatus::MeshReady;
                                p.mesh_url = Some(url.clone());
                                p.mesh_storage_path = Some(path.clone());
                                p.mesh_format = Some(format);
                                p.mesh_download_files = files.clone();
                                p.download_retry_count = 0;
                                Ok(())
                            })
                            .await?;
                        if let Err(e) = self.ledger.increment_generation_count(caller).await {
                            tracing::warn!(pipeline_id, error = %e, "failed to bump generation count");
                        }
                        Ok(result)
                    }
                    Err(ProviderError::NoMatchingFormat) => {
                        self.bump_download_retry_or_fail(pipeline_id, caller, snapshot, ErrorStep::GeneratingMesh)
                            .await
                    }
                    Err(e) => {
                        self.fail_step(pipeline_id, caller, snapshot.credits_charged.mesh, ErrorStep::GeneratingMesh, PipelineError::Provider(e))
                            .await
                    }
                }
            }
            TaskState::Failed => {
                let reason = poll.failure_reason.unwrap_or_else(|| "provider reported failure".to_string());
                self.fail_step(
                    pipeline_id,
                    caller,
                    snapshot.credits_charged.mesh,
                    ErrorStep::GeneratingMesh,
                    PipelineError::Provider(ProviderError::TaskFailed(reason)),
                )
                .await
            }
            TaskState::Cancelled => {
                self.fail_step(
                    pipeline_id,
                    caller,
                    snapshot.credits_charged.mesh,
                    ErrorStep::GeneratingMesh,
                    PipelineError::Provider(ProviderError::TaskFailed("provider cancelled the task".to_string())),
                )
                .await
            }
        }
    }

    pub async fn start_texture(
        &self,
        pipeline_id: &str,
        caller: &str,
        text_prompt: Option<String>,
        enable_pbr: bool,
    ) -> Result<Pipeline, PipelineError> {
        let snapshot = self.load_owned(pipeline_id, caller).await?;
        let resuming_failed =
            snapshot.status == PipelineStatus::Failed && snapshot.error_step == Some(ErrorStep::GeneratingTexture);
        if !(snapshot.status == PipelineStatus::MeshReady || resuming_failed) {
            return Err(PipelineError::FailedPrecondition(
                "startTexture is only valid from mesh-ready or a failed texture step".to_string(),
            ));
        }
        let style_image = snapshot.mesh_images.get(&Angle::Front).ok_or_else(|| {
            PipelineError::FailedPrecondition("no front-angle reference image available for texturing".to_string())
        })?;
        let mesh_task_id = snapshot
            .provider_task_id
            .clone()
            .ok_or_else(|| PipelineError::FailedPrecondition("no mesh task id recorded".to_string()))?;

        let cost = TEXTURE_COST;
        self.ledger.deduct_credits(caller, cost, pipeline_id).await?;

        let options = RetextureOptions {
            style_url: style_image.url.clone(),
            text_prompt,
            enable_pbr,
        };
        let handle = match self.retexture.submit_from_mesh(&mesh_task_id, options).await {
            Ok(h) => h,
            Err(e) => {
                return self
                    .fail_step(pipeline_id, caller, cost, ErrorStep::GeneratingTexture, PipelineError::Provider(e))
                    .await
            }
        };

        self.commit_with_retry(pipeline_id, move |p| {
            p.status = PipelineStatus::GeneratingTexture;
            p.error = None;
            p.error_step = None;
            p.texture_task_id = Some(handle.task_id.clone());
            p.credits_charged.texture = cost;
            p.download_retry_count = 0;
            Ok(())
        })
        .await
    }

    async fn poll_texture(&self, pipeline_id: &str, caller: &str, snapshot: &Pipeline) -> Result<Pipeline, PipelineError> {
        let task_id = snapshot
            .texture_task_id
            .clone()
            .ok_or_else(|| PipelineError::FailedPrecondition("no texture task id recorded".to_string()))?;
        let handle = TaskHandle {
            task_id,
            subscription_key: None,
        };
        let poll = self.retexture.poll(&handle).await.map_err(PipelineError::Provider)?;

        match poll.state {
            TaskState::Queued | TaskState::Running => Ok(snapshot.clone()),
            TaskState::Succeeded => match self.retexture.download(&handle).await {
                Ok(files) if !files.is_empty() => {
                    let primary = files
                        .iter()
                        .find(|f| f.format == MeshFormat::Glb)
                        .or_else(|| files.first())
                        .cloned()
                        .ok_or_else(|| {
                            PipelineError::Provider(ProviderError::NoMatchingFormat)
                        })?;
                    let bytes = self
                        .retexture
                        .fetch_bytes(&primary.url)
                        .await
                        .map_err(PipelineError::Provider)?;
                    let path = format!("pipelines/{}/{}/textured.glb", snapshot.user_id, pipeline_id);
                    let url = self
                        .blobs
                        .put_bytes(&path, bytes, MeshFormat::Glb.content_type())
                        .await
                        .map_err(PipelineError::Store)?;
                    let now = Utc::now();
                    self.commit_with_retry(pipeline_id, move |p| {
                        p.status = PipelineStatus::Completed;
                        p.textured_model_url = Some(url.clone());
                        p.textured_model_storage_path = Some(path.clone());
                        p.completed_at = Some(now);
                        p.download_retry_count = 0;
                        Ok(())
                    })
                    .await
                }
                Ok(_) => {
                    self.bump_download_retry_or_fail(pipeline_id, caller, snapshot, ErrorStep::GeneratingTexture)
                        .await
                }
                Err(e) => {
                    self.fail_step(
                        pipeline_id,
                        caller,
                        snapshot.credits_charged.texture,
                        ErrorStep::GeneratingTexture,
                        PipelineError::Provider(e),
                    )
                    .await
                }
            },
            TaskState::Failed => {
                let reason = poll.failure_reason.unwrap_or_else(|| "provider reported failure".to_string());
                self.fail_step(
                    pipeline_id,
                    caller,
                    snapshot.credits_charged.texture,
                    ErrorStep::GeneratingTexture,
                    PipelineError::Provider(ProviderError::TaskFailed(reason)),
                )
                .await
            }
            TaskState::Cancelled => {
                self.fail_step(
                    pipeline_id,
                    caller,
                    snapshot.credits_charged.texture,
                    ErrorStep::GeneratingTexture,
                    PipelineError::Provider(ProviderError::TaskFailed("provider cancelled the task".to_string())),
                )
                .await
            }
        }
    }

    pub async fn reset_step(
        &self,
        pipeline_id: &str,
        caller: &str,
        target: ResetTarget,
        keep_results: bool,
    ) -> Result<Pipeline, PipelineError> {
        self.load_owned(pipeline_id, caller).await?;

        self.commit_with_retry(pipeline_id, move |p| {
            if p.status.is_generating() {
                return Err(PipelineError::FailedPrecondition(
                    "resetStep is not valid while a step is generating".to_string(),
                ));
            }
            let has_all_mesh_images = Angle::ALL.iter().all(|a| p.mesh_images.contains_key(a));
            let target_reachable = match target {
                ResetTarget::Draft => true,
                ResetTarget::ImagesReady => has_all_mesh_images,
                ResetTarget::MeshReady => has_all_mesh_images && p.mesh_url.is_some(),
            };
            if !target_reachable {
                return Err(PipelineError::FailedPrecondition(
                    "resetStep target is ahead of the pipeline's current progress".to_string(),
                ));
            }
            p.error = None;
            p.error_step = None;
            if !keep_results {
                match target {
                    ResetTarget::Draft => {
                        p.mesh_images.clear();
                        p.aggregated_color_palette = None;
                        p.generation_progress = GenerationProgress::default();
                        clear_mesh_outputs(p);
                        clear_texture_outputs(p);
                    }
                    ResetTarget::ImagesReady => {
                        clear_mesh_outputs(p);
                        clear_texture_outputs(p);
                    }
                    ResetTarget::MeshReady => {
                        clear_texture_outputs(p);
                    }
                }
            }
            p.status = match target {
                ResetTarget::Draft => PipelineStatus::Draft,
                ResetTarget::ImagesReady => PipelineStatus::ImagesReady,
                ResetTarget::MeshReady => PipelineStatus::MeshReady,
            };
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use tokio::sync::Mutex as AsyncMutex;

    use m3d_api::provider::{MeshDriver, PollResult};
    use m3d_ledger::DocStoreLedger;
    use m3d_providers::MeshProviderRegistry;
    use m3d_storage::{MemoryBlobStore, MemoryDocStore};
    use m3d_types::pipeline::{MeshProviderId, PrinterType};
    use m3d_vision::{BackendVisionClient, MockVisionBackend};

    fn default_settings() -> PipelineSettings {
        PipelineSettings {
            quality: "standard".to_string(),
            printer_type: PrinterType::Fdm,
            format: MeshFormat::Glb,
            provider: None,
            provider_options: serde_json::json!({}),
            generation_mode: "figurine".to_string(),
            selected_style: Style::Chibi,
            color_count: 3,
            gemini_model: "gemini-2.0-flash-exp".to_string(),
        }
    }

    /// A `MeshDriver` test double whose `poll` replays a fixed sequence of
    /// states (scenario 1's "two polls return running then succeeded", and
    /// scenario 3's "next poll returns failed").
    struct StubMeshDriver {
        tag: MeshProviderId,
        cost: i64,
        states: AsyncMutex<VecDeque<TaskState>>,
        format: MeshFormat,
    }

    impl StubMeshDriver {
        fn new(tag: MeshProviderId, cost: i64, states: Vec<TaskState>, format: MeshFormat) -> Self {
            Self {
                tag,
                cost,
                states: AsyncMutex::new(states.into()),
                format,
            }
        }
    }

    #[async_trait]
    impl MeshDriver for StubMeshDriver {
        fn id(&self) -> &'static str {
            self.tag.as_str()
        }

        fn cost(&self) -> i64 {
            self.cost
        }

        async fn submit(
            &self,
            _image_urls: &[String],
            _options: &serde_json::Value,
        ) -> Result<TaskHandle, ProviderError> {
            Ok(TaskHandle {
                task_id: format!("{}-task", self.tag.as_str()),
                subscription_key: None,
            })
        }

        async fn poll(&self, _handle: &TaskHandle) -> Result<PollResult, ProviderError> {
            let mut states = self.states.lock().await;
            let state = states.pop_front().unwrap_or(TaskState::Succeeded);
            Ok(PollResult {
                state,
                progress: None,
                failure_reason: match state {
                    TaskState::Failed => Some("stub provider failure".to_string()),
                    _ => None,
                },
            })
        }

        async fn download(
            &self,
            _handle: &TaskHandle,
            required_format: MeshFormat,
        ) -> Result<Vec<DownloadFile>, ProviderError> {
            if required_format == self.format {
                Ok(vec![DownloadFile {
                    format: required_format,
                    url: "https://stub.test/model.glb".to_string(),
                    name: "model.glb".to_string(),
                }])
            } else {
                Ok(vec![])
            }
        }

        async fn fetch_bytes(&self, _url: &str) -> Result<Vec<u8>, ProviderError> {
            Ok(b"stub-mesh-bytes".to_vec())
        }
    }

    /// A `RetextureDriver` test double, same replay-sequence shape as
    /// `StubMeshDriver`.
    struct StubRetextureDriver {
        states: AsyncMutex<VecDeque<TaskState>>,
    }

    impl StubRetextureDriver {
        fn new(states: Vec<TaskState>) -> Self {
            Self {
                states: AsyncMutex::new(states.into()),
            }
        }
    }

    #[async_trait]
    impl RetextureDriver for StubRetextureDriver {
        async fn submit_from_mesh(
            &self,
            _mesh_task_id: &str,
            _options: RetextureOptions,
        ) -> Result<TaskHandle, ProviderError> {
            Ok(TaskHandle {
                task_id: "retexture-task".to_string(),
                subscription_key: None,
            })
        }

        async fn poll(&self, _handle: &TaskHandle) -> Result<PollResult, ProviderError> {
            let mut states = self.states.lock().await;
            let state = states.pop_front().unwrap_or(TaskState::Succeeded);
            Ok(PollResult {
                state,
                progress: None,
                failure_reason: match state {
                    TaskState::Failed => Some("stub retexture failure".to_string()),
                    _ => None,
                },
            })
        }

        async fn download(&self, _handle: &TaskHandle) -> Result<Vec<DownloadFile>, ProviderError> {
            Ok(vec![DownloadFile {
                format: MeshFormat::Glb,
                url: "https://stub.test/textured.glb".to_string(),
                name: "textured.glb".to_string(),
            }])
        }

        async fn fetch_bytes(&self, _url: &str) -> Result<Vec<u8>, ProviderError> {
            Ok(b"stub-texture-bytes".to_vec())
        }
    }

    struct Harness {
        engine: PipelineEngine,
        store: Arc<MemoryDocStore>,
    }

    async fn build_harness(
        mesh_states: Vec<TaskState>,
        mesh_cost: i64,
        texture_states: Vec<TaskState>,
        vision: MockVisionBackend,
    ) -> Harness {
        let store = Arc::new(MemoryDocStore::new());
        store.seed_account("u1", 100).await;
        store.seed_account("u2", 100).await;

        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::default());
        blobs
            .put_bytes("uploads/u1/ref.png", vec![9, 8, 7], "image/png")
            .await
            .unwrap();

        let doc_store: Arc<dyn DocStore> = store.clone();
        let ledger: Arc<dyn CreditLedger> = Arc::new(DocStoreLedger::new(doc_store.clone()));
        let vision: Arc<dyn VisionClient> = Arc::new(BackendVisionClient::new(vision));

        let mut registry = MeshProviderRegistry::new();
        registry.register(
            MeshProviderId::Meshy,
            Arc::new(StubMeshDriver::new(
                MeshProviderId::Meshy,
                mesh_cost,
                mesh_states.clone(),
                MeshFormat::Glb,
            )),
        );
        registry.register(
            MeshProviderId::Hunyuan,
            Arc::new(StubMeshDriver::new(
                MeshProviderId::Hunyuan,
                mesh_cost,
                mesh_states,
                MeshFormat::Glb,
            )),
        );
        let retexture: Arc<dyn RetextureDriver> = Arc::new(StubRetextureDriver::new(texture_states));

        let engine = PipelineEngine::new(doc_store, blobs, ledger, vision, registry, retexture);
        Harness { engine, store }
    }

    async fn balance(store: &MemoryDocStore, user: &str) -> i64 {
        store
            .get_account(user)
            .await
            .map(|a| a.credits)
            .unwrap_or_default()
    }

    /// §8 scenario 1: happy path on meshy, two polls (running, succeeded).
    #[tokio::test]
    async fn scenario_1_happy_path_meshy_chibi() {
        let harness = build_harness(
            vec![TaskState::Running, TaskState::Succeeded],
            5,
            vec![],
            MockVisionBackend::default(),
        )
        .await;

        let p = harness
            .engine
            .create(
                "u1",
                vec!["uploads/u1/ref.png".to_string()],
                default_settings(),
                ProcessingMode::Realtime,
                None,
            )
            .await
            .unwrap();

        harness.engine.analyze(&p.id, "u1", "en-US").await.unwrap();
        let p = harness.engine.generate_views(&p.id, "u1").await.unwrap();
        assert_eq!(p.status, PipelineStatus::ImagesReady);
        assert_eq!(p.mesh_images.len(), 4);
        assert_eq!(p.credits_charged.views, 3);
        assert_eq!(balance(&harness.store, "u1").await, 97);

        let p = harness
            .engine
            .start_mesh(&p.id, "u1", MeshProviderId::Meshy, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(p.status, PipelineStatus::GeneratingMesh);
        assert_eq!(p.credits_charged.mesh, 5);
        assert_eq!(balance(&harness.store, "u1").await, 92);

        // First poll: still running.
        let p = harness.engine.check_status(&p.id, "u1").await.unwrap();
        assert_eq!(p.status, PipelineStatus::GeneratingMesh);

        // Second poll: succeeded, downloads and stores the mesh.
        let p = harness.engine.check_status(&p.id, "u1").await.unwrap();
        assert_eq!(p.status, PipelineStatus::MeshReady);
        assert!(p.mesh_url.is_some());
        assert_eq!(p.mesh_format, Some(MeshFormat::Glb));
        assert_eq!(balance(&harness.store, "u1").await, 92);

        let txs = harness.store.list_transactions(&p.id).await.unwrap();
        assert_eq!(txs.iter().map(|t| t.amount).sum::<i64>(), -8);
    }

    /// §8 scenario 2: four regenerations succeed, the fifth is rejected.
    #[tokio::test]
    async fn scenario_2_regeneration_cap() {
        let harness = build_harness(vec![], 5, vec![], MockVisionBackend::default()).await;
        let p = harness
            .engine
            .create(
                "u1",
                vec!["uploads/u1/ref.png".to_string()],
                default_settings(),
                ProcessingMode::Realtime,
                None,
            )
            .await
            .unwrap();
        harness.engine.analyze(&p.id, "u1", "en-US").await.unwrap();
        let p = harness.engine.generate_views(&p.id, "u1").await.unwrap();

        let mut current = p;
        for i in 0..4 {
            current = harness
                .engine
                .regenerate_view(&current.id, "u1", Angle::Front, Some(format!("bigger ears {i}")))
                .await
                .unwrap();
            assert_eq!(current.regenerations_used, i + 1);
        }

        let err = harness
            .engine
            .regenerate_view(&current.id, "u1", Angle::Front, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ResourceExhausted(_)));

        // No mutation on the rejected attempt.
        let reloaded = harness.engine.get_pipeline(&current.id, "u1").await.unwrap();
        assert_eq!(reloaded.regenerations_used, 4);
    }

    /// §8 scenario 3: a provider failure refunds the mesh debit exactly.
    #[tokio::test]
    async fn scenario_3_provider_failure_refunds_mesh_cost() {
        let harness = build_harness(
            vec![TaskState::Failed],
            6,
            vec![],
            MockVisionBackend::default(),
        )
        .await;
        let p = harness
            .engine
            .create(
                "u1",
                vec!["uploads/u1/ref.png".to_string()],
                default_settings(),
                ProcessingMode::Realtime,
                None,
            )
            .await
            .unwrap();
        harness.engine.analyze(&p.id, "u1", "en-US").await.unwrap();
        let p = harness.engine.generate_views(&p.id, "u1").await.unwrap();
        assert_eq!(balance(&harness.store, "u1").await, 97);

        let p = harness
            .engine
            .start_mesh(&p.id, "u1", MeshProviderId::Hunyuan, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(balance(&harness.store, "u1").await, 91);

        let p = harness.engine.check_status(&p.id, "u1").await.unwrap();
        assert_eq!(p.status, PipelineStatus::Failed);
        assert_eq!(p.error_step, Some(ErrorStep::GeneratingMesh));
        assert_eq!(p.credits_charged.mesh, 0);
        assert_eq!(balance(&harness.store, "u1").await, 97);

        let txs = harness.store.list_transactions(&p.id).await.unwrap();
        let mesh_rows: Vec<i64> = txs.iter().map(|t| t.amount).filter(|a| a.abs() == 6).collect();
        assert_eq!(mesh_rows, vec![-6, 6]);
    }

    /// §8 scenario 4: resetStep with keepResults=true preserves outputs and
    /// writes no ledger row.
    #[tokio::test]
    async fn scenario_4_reset_keep_results_preserves_mesh() {
        let harness = build_harness(
            vec![TaskState::Succeeded],
            5,
            vec![],
            MockVisionBackend::default(),
        )
        .await;
        let p = harness
            .engine
            .create(
                "u1",
                vec!["uploads/u1/ref.png".to_string()],
                default_settings(),
                ProcessingMode::Realtime,
                None,
            )
            .await
            .unwrap();
        harness.engine.analyze(&p.id, "u1", "en-US").await.unwrap();
        let p = harness.engine.generate_views(&p.id, "u1").await.unwrap();
        let p = harness
            .engine
            .start_mesh(&p.id, "u1", MeshProviderId::Meshy, serde_json::json!({}))
            .await
            .unwrap();
        let p = harness.engine.check_status(&p.id, "u1").await.unwrap();
        assert_eq!(p.status, PipelineStatus::MeshReady);
        let txs_before = harness.store.list_transactions(&p.id).await.unwrap().len();

        let p = harness
            .engine
            .reset_step(&p.id, "u1", ResetTarget::ImagesReady, true)
            .await
            .unwrap();
        assert_eq!(p.status, PipelineStatus::ImagesReady);
        assert!(p.mesh_url.is_some());
        assert_eq!(p.credits_charged.mesh, 5);

        let txs_after = harness.store.list_transactions(&p.id).await.unwrap().len();
        assert_eq!(txs_before, txs_after);
    }

    /// §8 scenario 5: resetStep without keepResults wipes mesh outputs and
    /// zeroes the charge, but does not refund credits.
    #[tokio::test]
    async fn scenario_5_reset_without_keep_results_clears_but_does_not_refund() {
        let harness = build_harness(
            vec![TaskState::Succeeded],
            5,
            vec![],
            MockVisionBackend::default(),
        )
        .await;
        let p = harness
            .engine
            .create(
                "u1",
                vec!["uploads/u1/ref.png".to_string()],
                default_settings(),
                ProcessingMode::Realtime,
                None,
            )
            .await
            .unwrap();
        harness.engine.analyze(&p.id, "u1", "en-US").await.unwrap();
        let p = harness.engine.generate_views(&p.id, "u1").await.unwrap();
        let p = harness
            .engine
            .start_mesh(&p.id, "u1", MeshProviderId::Meshy, serde_json::json!({}))
            .await
            .unwrap();
        let p = harness.engine.check_status(&p.id, "u1").await.unwrap();
        let balance_before = balance(&harness.store, "u1").await;

        let p = harness
            .engine
            .reset_step(&p.id, "u1", ResetTarget::ImagesReady, false)
            .await
            .unwrap();
        assert_eq!(p.status, PipelineStatus::ImagesReady);
        assert!(p.mesh_url.is_none());
        assert!(p.mesh_download_files.is_empty());
        assert_eq!(p.credits_charged.mesh, 0);
        assert!(p.provider_task_id.is_none());
        assert_eq!(balance(&harness.store, "u1").await, balance_before);
    }

    /// §3 invariants 2-3: resetStep must not be able to set `status` ahead of
    /// what the record actually has outputs for.
    #[tokio::test]
    async fn reset_step_rejects_target_ahead_of_current_progress() {
        let harness = build_harness(vec![], 5, vec![], MockVisionBackend::default()).await;
        let p = harness
            .engine
            .create(
                "u1",
                vec!["uploads/u1/ref.png".to_string()],
                default_settings(),
                ProcessingMode::Realtime,
                None,
            )
            .await
            .unwrap();
        harness.engine.analyze(&p.id, "u1", "en-US").await.unwrap();
        let p = harness.engine.generate_views(&p.id, "u1").await.unwrap();
        assert_eq!(p.status, PipelineStatus::ImagesReady);

        let err = harness
            .engine
            .reset_step(&p.id, "u1", ResetTarget::MeshReady, true)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::FailedPrecondition(_)));

        let reloaded = harness.store.get_pipeline(&p.id).await.unwrap();
        assert_eq!(reloaded.status, PipelineStatus::ImagesReady);
        assert!(reloaded.mesh_url.is_none());
    }

    /// Same guard, exercised from `draft` against `ImagesReady`: no mesh
    /// images exist yet, so the target is unreachable.
    #[tokio::test]
    async fn reset_step_rejects_images_ready_target_from_draft() {
        let harness = build_harness(vec![], 5, vec![], MockVisionBackend::default()).await;
        let p = harness
            .engine
            .create(
                "u1",
                vec!["uploads/u1/ref.png".to_string()],
                default_settings(),
                ProcessingMode::Realtime,
                None,
            )
            .await
            .unwrap();
        assert_eq!(p.status, PipelineStatus::Draft);

        let err = harness
            .engine
            .reset_step(&p.id, "u1", ResetTarget::ImagesReady, true)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::FailedPrecondition(_)));

        let reloaded = harness.store.get_pipeline(&p.id).await.unwrap();
        assert_eq!(reloaded.status, PipelineStatus::Draft);
    }

    /// P7: retrying `generateViews` after a refunded failure never double-debits.
    #[tokio::test]
    async fn p7_retry_after_failed_views_never_double_debits() {
        let harness = build_harness(
            vec![],
            5,
            vec![],
            MockVisionBackend {
                fail_angle: Some(Angle::Back),
            },
        )
        .await;
        let p = harness
            .engine
            .create(
                "u1",
                vec!["uploads/u1/ref.png".to_string()],
                default_settings(),
                ProcessingMode::Realtime,
                None,
            )
            .await
            .unwrap();
        harness.engine.analyze(&p.id, "u1", "en-US").await.unwrap();

        let p = harness.engine.generate_views(&p.id, "u1").await.unwrap();
        assert_eq!(p.status, PipelineStatus::Failed);
        assert_eq!(p.error_step, Some(ErrorStep::GeneratingImages));
        assert_eq!(balance(&harness.store, "u1").await, 100);

        let p = harness.engine.generate_views(&p.id, "u1").await.unwrap();
        assert_eq!(p.status, PipelineStatus::Failed);
        assert_eq!(balance(&harness.store, "u1").await, 100);

        let txs = harness.store.list_transactions(&p.id).await.unwrap();
        assert_eq!(txs.iter().map(|t| t.amount).sum::<i64>(), 0);
        assert_eq!(txs.len(), 4);
    }

    /// P6: a command issued by a non-owner is rejected without revealing data.
    #[tokio::test]
    async fn p6_ownership_isolation() {
        let harness = build_harness(vec![], 5, vec![], MockVisionBackend::default()).await;
        let p = harness
            .engine
            .create(
                "u1",
                vec!["uploads/u1/ref.png".to_string()],
                default_settings(),
                ProcessingMode::Realtime,
                None,
            )
            .await
            .unwrap();

        let err = harness.engine.get_pipeline(&p.id, "u2").await.unwrap_err();
        assert!(matches!(err, PipelineError::PermissionDenied(_)));
    }

    /// §7: a failed texture step preserves `meshUrl` so the user can finish
    /// with mesh only via `resetStep(mesh-ready, keepResults=true)`.
    #[tokio::test]
    async fn failed_texture_preserves_mesh_url_for_finish_with_mesh_only() {
        let harness = build_harness(
            vec![TaskState::Succeeded],
            5,
            vec![TaskState::Failed],
            MockVisionBackend::default(),
        )
        .await;
        let p = harness
            .engine
            .create(
                "u1",
                vec!["uploads/u1/ref.png".to_string()],
                default_settings(),
                ProcessingMode::Realtime,
                None,
            )
            .await
            .unwrap();
        harness.engine.analyze(&p.id, "u1", "en-US").await.unwrap();
        let p = harness.engine.generate_views(&p.id, "u1").await.unwrap();
        let p = harness
            .engine
            .start_mesh(&p.id, "u1", MeshProviderId::Meshy, serde_json::json!({}))
            .await
            .unwrap();
        let p = harness.engine.check_status(&p.id, "u1").await.unwrap();
        assert_eq!(p.status, PipelineStatus::MeshReady);
        let mesh_url_before = p.mesh_url.clone();

        let p = harness
            .engine
            .start_texture(&p.id, "u1", None, true)
            .await
            .unwrap();
        assert_eq!(p.status, PipelineStatus::GeneratingTexture);

        let p = harness.engine.check_status(&p.id, "u1").await.unwrap();
        assert_eq!(p.status, PipelineStatus::Failed);
        assert_eq!(p.error_step, Some(ErrorStep::GeneratingTexture));
        assert_eq!(p.mesh_url, mesh_url_before);
        assert_eq!(p.credits_charged.texture, 0);

        let p = harness
            .engine
            .reset_step(&p.id, "u1", ResetTarget::MeshReady, true)
            .await
            .unwrap();
        assert_eq!(p.status, PipelineStatus::MeshReady);
        assert_eq!(p.mesh_url, mesh_url_before);
    }
}
