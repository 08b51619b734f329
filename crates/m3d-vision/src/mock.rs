//! Deterministic mock vision backend for tests and offline development: no
//! network calls, outputs derived purely from the inputs so repeated calls
//! are reproducible.

use async_trait::async_trait;

use m3d_api::vision::GeneratedView;
use m3d_types::error::VisionError;
use m3d_types::pipeline::{Analysis, Angle, PrintFriendliness, PrinterType, Style};

use crate::fanout::AngleGenerator;

#[derive(Debug, Default, Clone)]
pub struct MockVisionBackend {
    /// If set, every `generate` call for this angle fails instead of
    /// succeeding, for exercising the fan-out's first-error policy.
    pub fail_angle: Option<Angle>,
}

fn deterministic_palette(seed: &str, count: usize) -> Vec<String> {
    let digest: u32 = seed.bytes().fold(0u32, |acc, b| {
        acc.wrapping_mul(31).wrapping_add(b as u32)
    });
    (0..count)
        .map(|i| {
            let v = digest.wrapping_add((i as u32).wrapping_mul(2654435761));
            format!("#{:06X}", v & 0x00FF_FFFF)
        })
        .collect()
}

#[async_trait]
impl AngleGenerator for MockVisionBackend {
    async fn generate(
        &self,
        ref_bytes: &[u8],
        _mime_type: &str,
        angle: Angle,
        _user_description: Option<&str>,
        palette: Option<&[String]>,
        _style: Style,
        _hint: Option<&str>,
    ) -> Result<GeneratedView, VisionError> {
        if self.fail_angle == Some(angle) {
            return Err(VisionError::NoImageReturned {
                diagnostic: format!("mock configured to fail angle {angle:?}"),
            });
        }

        let seed = format!("{angle:?}:{}", ref_bytes.len());
        let color_palette = palette
            .map(|p| p.to_vec())
            .unwrap_or_else(|| deterministic_palette(&seed, 3));

        Ok(GeneratedView {
            angle,
            image_bytes: vec![0xAB; 16],
            mime_type: "image/png".to_string(),
            color_palette,
        })
    }
}

impl MockVisionBackend {
    pub async fn analyze(
        &self,
        ref_bytes: &[u8],
        color_count: u8,
        _printer_type: PrinterType,
        _locale: &str,
        style: Style,
    ) -> Result<Analysis, VisionError> {
        let seed = format!("analyze:{}", ref_bytes.len());
        let color_palette = deterministic_palette(&seed, color_count.max(3) as usize);
        let recommended_style = if style == Style::None {
            Style::Cartoon
        } else {
            style
        };

        Ok(Analysis {
            description: "a small figurine-sized object".to_string(),
            color_palette: color_palette.clone(),
            dominant_colors: color_palette.into_iter().take(3).collect(),
            detected_materials: vec!["plastic".to_string()],
            object_type: "figurine".to_string(),
            print_friendliness: PrintFriendliness {
                score: 4,
                color_suggestions: vec![],
                structural_concerns: vec![],
                material_recommendations: vec!["PLA".to_string()],
                orientation_tips: vec!["print base-down".to_string()],
            },
            recommended_style,
            style_confidence: 0.75,
            style_reasoning: "deterministic mock reasoning".to_string(),
            style_suitability: 0.8,
            analyzed_with_style: style,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_input_yields_same_palette() {
        let backend = MockVisionBackend::default();
        let a = backend
            .generate(&[1, 2, 3], "image/png", Angle::Front, None, None, Style::None, None)
            .await
            .unwrap();
        let b = backend
            .generate(&[1, 2, 3], "image/png", Angle::Front, None, None, Style::None, None)
            .await
            .unwrap();
        assert_eq!(a.color_palette, b.color_palette);
    }

    #[tokio::test]
    async fn configured_fail_angle_errors() {
        let backend = MockVisionBackend {
            fail_angle: Some(Angle::Back),
        };
        let result = backend
            .generate(&[1], "image/png", Angle::Back, None, None, Style::None, None)
            .await;
        assert!(result.is_err());
    }
}
