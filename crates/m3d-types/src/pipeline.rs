//! §3 data model: the `Pipeline` record and its nested structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bound on §3/§4.5 `regenerationsUsed`.
pub const MAX_REGENERATIONS: u32 = 4;
/// §4.5 texture-stage flat cost.
pub const TEXTURE_COST: i64 = 10;
/// §4.6 cap on `onPoll` download retries before the step is abandoned as failed.
pub const MAX_DOWNLOAD_RETRIES: u32 = 60;

pub type PipelineId = String;
pub type UserId = String;

/// Closed set of mesh angles (§3, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Angle {
    Front,
    Back,
    Left,
    Right,
}

impl Angle {
    /// Fixed ordering used for tie-breaking in palette aggregation (§3 invariant 7, §4.3).
    pub const ALL: [Angle; 4] = [Angle::Front, Angle::Back, Angle::Left, Angle::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Angle::Front => "front",
            Angle::Back => "back",
            Angle::Left => "left",
            Angle::Right => "right",
        }
    }
}

/// §3 `processingMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    Realtime,
    Batch,
}

/// §4.3 closed style descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    None,
    Bobblehead,
    Chibi,
    Cartoon,
    Emoji,
}

/// §4.4 closed provider set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshProviderId {
    Meshy,
    Tripo,
    Hunyuan,
    Rodin,
}

impl MeshProviderId {
    pub const ALL: [MeshProviderId; 4] = [
        MeshProviderId::Meshy,
        MeshProviderId::Tripo,
        MeshProviderId::Hunyuan,
        MeshProviderId::Rodin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MeshProviderId::Meshy => "meshy",
            MeshProviderId::Tripo => "tripo",
            MeshProviderId::Hunyuan => "hunyuan",
            MeshProviderId::Rodin => "rodin",
        }
    }
}

/// §3 `settings.printerType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterType {
    Fdm,
    Sla,
    Resin,
}

/// §3 `settings.format`; also used for §4.4 download preference ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshFormat {
    Glb,
    Fbx,
    Obj,
    Stl,
}

impl MeshFormat {
    /// §4.4 download fallback preference order: `glb > fbx > obj > stl`.
    pub const PREFERENCE_ORDER: [MeshFormat; 4] =
        [MeshFormat::Glb, MeshFormat::Fbx, MeshFormat::Obj, MeshFormat::Stl];

    pub fn as_str(&self) -> &'static str {
        match self {
            MeshFormat::Glb => "glb",
            MeshFormat::Fbx => "fbx",
            MeshFormat::Obj => "obj",
            MeshFormat::Stl => "stl",
        }
    }

    /// §6 blob-layout content type rule.
    pub fn content_type(&self) -> &'static str {
        match self {
            MeshFormat::Glb => "model/gltf-binary",
            MeshFormat::Fbx | MeshFormat::Stl => "application/octet-stream",
            MeshFormat::Obj => "text/plain",
        }
    }
}

/// §3 `printFriendliness`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintFriendliness {
    /// 1..5
    pub score: u8,
    pub color_suggestions: Vec<String>,
    pub structural_concerns: Vec<String>,
    pub material_recommendations: Vec<String>,
    pub orientation_tips: Vec<String>,
}

/// §3 `imageAnalysis`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub description: String,
    /// 3..12 hex colors.
    pub color_palette: Vec<String>,
    pub dominant_colors: Vec<String>,
    pub detected_materials: Vec<String>,
    pub object_type: String,
    pub print_friendliness: PrintFriendliness,
    pub recommended_style: Style,
    /// 0.0..1.0
    pub style_confidence: f64,
    pub style_reasoning: String,
    /// 0.0..1.0
    pub style_suitability: f64,
    pub analyzed_with_style: Style,
}

/// §3 `meshImages` entry source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    Ai,
    Upload,
}

/// §3 `ProcessedImage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedImage {
    pub url: String,
    pub storage_path: String,
    pub source: ImageSource,
    pub color_palette: Option<Vec<String>>,
    pub generated_at: DateTime<Utc>,
}

/// §3 `aggregatedColorPalette`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedPalette {
    pub unified: Vec<String>,
    /// length <= 7
    pub dominant_colors: Vec<String>,
}

/// §3 `settings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub quality: String,
    pub printer_type: PrinterType,
    pub format: MeshFormat,
    pub provider: Option<MeshProviderId>,
    pub provider_options: serde_json::Value,
    pub generation_mode: String,
    pub selected_style: Style,
    /// 3..12
    pub color_count: u8,
    pub gemini_model: String,
}

/// §3 `creditsCharged`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CreditsCharged {
    pub views: i64,
    pub mesh: i64,
    pub texture: i64,
}

/// §4.5 `generationProgress.phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressPhase {
    MeshViews,
    Complete,
}

/// §3 `generationProgress`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GenerationProgress {
    pub phase: ProgressPhase,
    /// 0..4
    pub mesh_views_completed: u8,
}

impl Default for GenerationProgress {
    fn default() -> Self {
        Self {
            phase: ProgressPhase::MeshViews,
            mesh_views_completed: 0,
        }
    }
}

/// §4.5 pipeline status. `GeneratingImages` carries its optional batch sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "state")]
pub enum PipelineStatus {
    Draft,
    GeneratingImages,
    BatchQueued,
    BatchProcessing,
    ImagesReady,
    GeneratingMesh,
    MeshReady,
    GeneratingTexture,
    Completed,
    Failed,
}

impl PipelineStatus {
    pub fn is_generating(&self) -> bool {
        matches!(
            self,
            PipelineStatus::GeneratingImages
                | PipelineStatus::BatchQueued
                | PipelineStatus::BatchProcessing
                | PipelineStatus::GeneratingMesh
                | PipelineStatus::GeneratingTexture
        )
    }
}

/// §7 `errorStep`: which `generating-*` step a `failed` Pipeline last attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorStep {
    GeneratingImages,
    GeneratingMesh,
    GeneratingTexture,
}

/// §4.5 `resetStep` target states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResetTarget {
    Draft,
    ImagesReady,
    MeshReady,
}

/// The persisted error payload attached to a `failed` Pipeline (§3, populated by C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineErrorRecord {
    pub category: String,
    pub severity: String,
    pub code: String,
    pub user_message: String,
    pub technical_message: String,
    pub retryable: bool,
    pub suggested_retry_delay_ms: Option<u64>,
}

/// The persistent per-job record (§3 "Pipeline").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub user_id: UserId,
    pub status: PipelineStatus,
    pub processing_mode: ProcessingMode,
    pub generation_mode: String,
    pub input_images: Vec<String>,
    pub image_analysis: Option<Analysis>,
    pub user_description: Option<String>,
    pub mesh_images: BTreeMap<Angle, ProcessedImage>,
    pub aggregated_color_palette: Option<AggregatedPalette>,
    pub settings: PipelineSettings,
    pub provider_task_id: Option<String>,
    pub provider_subscription_key: Option<String>,
    pub mesh_url: Option<String>,
    pub mesh_storage_path: Option<String>,
    pub mesh_format: Option<MeshFormat>,
    pub mesh_download_files: Vec<DownloadFile>,
    pub texture_task_id: Option<String>,
    pub textured_model_url: Option<String>,
    pub textured_model_storage_path: Option<String>,
    pub credits_charged: CreditsCharged,
    pub regenerations_used: u32,
    pub generation_progress: GenerationProgress,
    /// Not listed in the distilled §3 attribute table but required by §4.6's
    /// download-retry cap; see SPEC_FULL.md §C.
    pub download_retry_count: u32,
    pub error: Option<PipelineErrorRecord>,
    pub error_step: Option<ErrorStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency version, per §5 ("retry once on conflict").
    pub version: u64,
}

/// §4.4 a downloadable mesh/texture artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadFile {
    pub format: MeshFormat,
    pub url: String,
    pub name: String,
}

/// The read-only projection returned to callers (§1, §4.7: "returns the
/// projected state"). Hides bookkeeping fields (`download_retry_count`,
/// `version`, `provider_subscription_key`) that are not part of the user-facing
/// contract.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineView {
    pub id: PipelineId,
    pub status: PipelineStatus,
    pub processing_mode: ProcessingMode,
    pub generation_mode: String,
    pub input_images: Vec<String>,
    pub image_analysis: Option<Analysis>,
    pub user_description: Option<String>,
    pub mesh_images: BTreeMap<Angle, ProcessedImage>,
    pub aggregated_color_palette: Option<AggregatedPalette>,
    pub settings: PipelineSettings,
    pub mesh_url: Option<String>,
    pub mesh_format: Option<MeshFormat>,
    pub mesh_download_files: Vec<DownloadFile>,
    pub textured_model_url: Option<String>,
    pub credits_charged: CreditsCharged,
    pub regenerations_used: u32,
    pub generation_progress: GenerationProgress,
    pub error: Option<PipelineErrorRecord>,
    pub error_step: Option<ErrorStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Pipeline> for PipelineView {
    fn from(p: &Pipeline) -> Self {
        Self {
            id: p.id.clone(),
            status: p.status,
            processing_mode: p.processing_mode,
            generation_mode: p.generation_mode.clone(),
            input_images: p.input_images.clone(),
            image_analysis: p.image_analysis.clone(),
            user_description: p.user_description.clone(),
            mesh_images: p.mesh_images.clone(),
            aggregated_color_palette: p.aggregated_color_palette.clone(),
            settings: p.settings.clone(),
            mesh_url: p.mesh_url.clone(),
            mesh_format: p.mesh_format,
            mesh_download_files: p.mesh_download_files.clone(),
            textured_model_url: p.textured_model_url.clone(),
            credits_charged: p.credits_charged,
            regenerations_used: p.regenerations_used,
            generation_progress: p.generation_progress,
            error: p.error.clone(),
            error_step: p.error_step,
            created_at: p.created_at,
            updated_at: p.updated_at,
            completed_at: p.completed_at,
        }
    }
}
