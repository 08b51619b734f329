//! Staggered parallelism engine (§4.3, §5, §8 scenario 6).
//!
//! Launches the four angle requests at offsets `0, 500, 1000, 1500 ms` then
//! awaits all four, each under an independent 60s timeout. If any angle
//! raises, the whole call raises with the *first* error in angle order;
//! others may still complete in the background but their results are
//! discarded (§4.3 failure policy) — modeled here as four genuinely spawned
//! tasks that the aggregator does not abort on the first failure.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use m3d_api::vision::{AllViewsResult, GeneratedView, ProgressCallback};
use m3d_types::error::VisionError;
use m3d_types::pipeline::{Angle, Style};

/// Per-angle stagger offset, per §4.3's fixed 500 ms floor.
pub const STAGGER_MS: u64 = 500;
const STAGGER_STEP: Duration = Duration::from_millis(STAGGER_MS);
/// Independent per-request timeout (§4.3, §5).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A single-angle image generator. Implementations drive the actual vision
/// provider; the fan-out engine only owns timing and error-aggregation.
#[async_trait]
pub trait AngleGenerator: Send + Sync {
    async fn generate(
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

/// Inputs for one angle request, owned so a spawned task can hold them for
/// the `'static` lifetime `tokio::spawn` requires.
struct AngleRequest {
    ref_bytes: Arc<Vec<u8>>,
    mime_type: Arc<String>,
    user_description: Option<Arc<String>>,
    palette: Option<Arc<Vec<String>>>,
    style: Style,
}

/// Runs the staggered fan-out over all four angles of `Angle::ALL`.
pub async fn generate_all_views_parallel<G: AngleGenerator + 'static>(
    generator: Arc<G>,
    ref_bytes: &[u8],
    mime_type: &str,
    user_description: Option<&str>,
    palette: Option<&[String]>,
    style: Style,
    progress: Option<ProgressCallback>,
) -> Result<AllViewsResult, VisionError> {
    let request = AngleRequest {
        ref_bytes: Arc::new(ref_bytes.to_vec()),
        mime_type: Arc::new(mime_type.to_string()),
        user_description: user_description.map(|s| Arc::new(s.to_string())),
        palette: palette.map(|p| Arc::new(p.to_vec())),
        style,
    };

    let mut handles = Vec::with_capacity(4);

    for (i, angle) in Angle::ALL.into_iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(STAGGER_STEP).await;
        }
        let generator = generator.clone();
        let ref_bytes = request.ref_bytes.clone();
        let mime_type = request.mime_type.clone();
        let user_description = request.user_description.clone();
        let palette = request.palette.clone();

        handles.push((
            angle,
            tokio::spawn(async move {
                tokio::time::timeout(
                    REQUEST_TIMEOUT,
                    generator.generate(
                        &ref_bytes,
                        &mime_type,
                        angle,
                        user_description.as_deref().map(|s| s.as_str()),
                        palette.as_deref().map(|p| p.as_slice()),
                        style,
                        None,
                    ),
                )
                .await
                .map_err(|_| VisionError::Timeout(REQUEST_TIMEOUT))?
            }),
        ));
    }

    let mut results: BTreeMap<Angle, GeneratedView> = BTreeMap::new();
    let mut first_err: Option<VisionError> = None;
    let mut completed = 0u8;

    for (angle, handle) in handles {
        match handle.await {
            Ok(Ok(view)) => {
                completed += 1;
                if let Some(cb) = &progress {
                    cb(angle, completed, 4);
                }
                results.insert(angle, view);
            }
            Ok(Err(e)) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
            Err(join_err) => {
                if first_err.is_none() {
                    first_err = Some(VisionError::ProviderError(format!(
                        "angle task panicked: {join_err}"
                    )));
                }
            }
        }
    }

    if let Some(err) = first_err {
        return Err(err);
    }

    let views = Angle::ALL
        .into_iter()
        .map(|angle| {
            results.remove(&angle).ok_or_else(|| {
                VisionError::ProviderError(format!("angle {angle:?} produced no result"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(AllViewsResult { views })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    struct LatencyGenerator {
        latency: Duration,
        fail_angle: Option<Angle>,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl AngleGenerator for LatencyGenerator {
        async fn generate(
            &self,
            _ref_bytes: &[u8],
            _mime_type: &str,
            angle: Angle,
            _user_description: Option<&str>,
            _palette: Option<&[String]>,
            _style: Style,
            _hint: Option<&str>,
        ) -> Result<GeneratedView, VisionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            if Some(angle) == self.fail_angle {
                return Err(VisionError::NoImageReturned {
                    diagnostic: "mock failure".into(),
                });
            }
            Ok(GeneratedView {
                angle,
                image_bytes: vec![0u8; 4],
                mime_type: "image/png".into(),
                color_palette: vec!["#000000".into()],
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_6_staggered_wall_time_under_tolerance() {
        let generator = Arc::new(LatencyGenerator {
            latency: Duration::from_secs(1),
            fail_angle: None,
            calls: Arc::new(AtomicU32::new(0)),
        });
        let start = Instant::now();
        let result = generate_all_views_parallel(
            generator,
            &[],
            "image/png",
            None,
            None,
            Style::None,
            None,
        )
        .await
        .unwrap();
        let elapsed = start.elapsed();
        assert_eq!(result.views.len(), 4);
        // stagger 0+500+1000+1500 = 1500ms + last call latency 1000ms = 2500ms.
        assert!(elapsed <= Duration::from_millis(2700), "elapsed={elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn failure_in_one_angle_fails_the_whole_call() {
        let generator = Arc::new(LatencyGenerator {
            latency: Duration::from_millis(10),
            fail_angle: Some(Angle::Left),
            calls: Arc::new(AtomicU32::new(0)),
        });
        let result = generate_all_views_parallel(
            generator,
            &[],
            "image/png",
            None,
            None,
            Style::None,
            None,
        )
        .await;
        assert!(result.is_err());
    }
}
