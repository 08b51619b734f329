//! C4 vision/view generator interface.

use async_trait::async_trait;
use m3d_types::error::VisionError;
use m3d_types::pipeline::{Analysis, Angle, PrinterType, Style};

/// A single generated angle view, prior to being wrapped into a
/// `ProcessedImage` by the pipeline state machine.
#[derive(Debug, Clone)]
pub struct GeneratedView {
    pub angle: Angle,
    pub image_bytes: Vec<u8>,
    pub mime_type: String,
    pub color_palette: Vec<String>,
}

/// Fan-out result for all four angles (§4.3).
#[derive(Debug, Clone)]
pub struct AllViewsResult {
    pub views: Vec<GeneratedView>,
}

/// `progressCallback(type='mesh', angle, completed, total=4)` (§4.3).
pub type ProgressCallback = Box<dyn Fn(Angle, u8, u8) + Send + Sync>;

/// Abstraction over the vision/generation provider used to analyze a
/// reference image and synthesize consistent multi-angle views.
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn analyze_image(
        &self,
        ref_bytes: &[u8],
        color_count: u8,
        printer_type: PrinterType,
        locale: &str,
        style: Style,
    ) -> Result<Analysis, VisionError>;

    /// Launches the four angle requests staggered at offsets
    /// `0, 500, 1000, 1500 ms` and awaits all four (§4.3 staggered
    /// parallelism contract). Invokes `progress` after each successful
    /// completion. If any angle fails, returns the first error.
    async fn generate_all_views_parallel(
        &self,
        ref_bytes: &[u8],
        mime_type: &str,
        user_description: Option<&str>,
        palette: Option<&[String]>,
        style: Style,
        progress: Option<ProgressCallback>,
    ) -> Result<AllViewsResult, VisionError>;

    /// Replaces a single angle slot (§4.5 `regenerateView`).
    async fn generate_mesh_view(
        &self,
        ref_bytes: &[u8],
        mime_type: &str,
        angle: Angle,
        user_description: Option<&str>,
        palette: Option<&[String]>,
        style: Style,
        hint: Option<&str>,
    ) -> Result<GeneratedView, VisionError>;
}
