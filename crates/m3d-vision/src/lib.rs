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

//! C4 vision/view generator: analyzes a reference image and synthesizes
//! consistent multi-angle views, backed by any [`fanout::AngleGenerator`].

pub mod fanout;
pub mod http_client;
pub mod mock;
pub mod palette;
pub mod prompt;
pub mod rate_limit;

use std::sync::Arc;

use async_trait::async_trait;

use m3d_api::vision::{AllViewsResult, GeneratedView, ProgressCallback, VisionClient};
use m3d_types::error::VisionError;
use m3d_types::pipeline::{Analysis, Angle, PrinterType, Style};

pub use fanout::AngleGenerator;
pub use http_client::HttpVisionBackend;
pub use mock::MockVisionBackend;
pub use rate_limit::RateLimiter;

/// Adapts a backend that knows how to analyze one image and generate one
/// angle view into the full [`VisionClient`] surface, supplying the
/// staggered fan-out engine (§4.3) for the multi-angle call.
pub struct BackendVisionClient<B> {
    backend: Arc<B>,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl<B> BackendVisionClient<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            rate_limiter: None,
        }
    }

    /// Opts into the optional leaky-bucket limiter at the C4 boundary (§5).
    /// Off by default; most deployments rely on the fan-out's own 500ms
    /// stagger instead.
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(Arc::new(limiter));
        self
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }
    }
}

#[async_trait]
impl VisionClient for BackendVisionClient<HttpVisionBackend> {
    async fn analyze_image(
        &self,
        ref_bytes: &[u8],
        color_count: u8,
        printer_type: PrinterType,
        locale: &str,
        style: Style,
    ) -> Result<Analysis, VisionError> {
        self.throttle().await;
        self.backend
            .analyze(ref_bytes, color_count, printer_type, locale, style)
            .await
    }

    async fn generate_all_views_parallel(
        &self,
        ref_bytes: &[u8],
        mime_type: &str,
        user_description: Option<&str>,
        palette: Option<&[String]>,
        style: Style,
        progress: Option<ProgressCallback>,
    ) -> Result<AllViewsResult, VisionError> {
        fanout::generate_all_views_parallel(
            self.backend.clone(),
            ref_bytes,
            mime_type,
            user_description,
            palette,
            style,
            progress,
        )
        .await
    }

    async fn generate_mesh_view(
        &self,
        ref_bytes: &[u8],
        mime_type: &str,
        angle: Angle,
        user_description: Option<&str>,
        palette: Option<&[String]>,
        style: Style,
        hint: Option<&str>,
    ) -> Result<GeneratedView, VisionError> {
        self.throttle().await;
        self.backend
            .generate(
                ref_bytes,
                mime_type,
                angle,
                user_description,
                palette,
                style,
                hint,
            )
            .await
    }
}

#[async_trait]
impl VisionClient for BackendVisionClient<MockVisionBackend> {
    async fn analyze_image(
        &self,
        ref_bytes: &[u8],
        color_count: u8,
        printer_type: PrinterType,
        locale: &str,
        style: Style,
    ) -> Result<Analysis, VisionError> {
        self.throttle().await;
        self.backend
            .analyze(ref_bytes, color_count, printer_type, locale, style)
            .await
    }

    async fn generate_all_views_parallel(
        &self,
        ref_bytes: &[u8],
        mime_type: &str,
        user_description: Option<&str>,
        palette: Option<&[String]>,
        style: Style,
        progress: Option<ProgressCallback>,
    ) -> Result<AllViewsResult, VisionError> {
        fanout::generate_all_views_parallel(
            self.backend.clone(),
            ref_bytes,
            mime_type,
            user_description,
            palette,
            style,
            progress,
        )
        .await
    }

    async fn generate_mesh_view(
        &self,
        ref_bytes: &[u8],
        mime_type: &str,
        angle: Angle,
        user_description: Option<&str>,
        palette: Option<&[String]>,
        style: Style,
        hint: Option<&str>,
    ) -> Result<GeneratedView, VisionError> {
        self.throttle().await;
        self.backend
            .generate(
                ref_bytes,
                mime_type,
                angle,
                user_description,
                palette,
                style,
                hint,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_backed_client_generates_all_four_angles() {
        let client = BackendVisionClient::new(MockVisionBackend::default());
        let result = client
            .generate_all_views_parallel(&[1, 2, 3], "image/png", None, None, Style::None, None)
            .await
            .unwrap();
        assert_eq!(result.views.len(), 4);
    }

    #[tokio::test]
    async fn mock_backed_client_analyze_respects_color_count() {
        let client = BackendVisionClient::new(MockVisionBackend::default());
        let analysis = client
            .analyze_image(&[1, 2, 3], 5, PrinterType::Fdm, "en-US", Style::None)
            .await
            .unwrap();
        assert_eq!(analysis.color_palette.len(), 5);
    }
}
