//! Public entry points: the synchronous in-process call and the async
//! [`Segmenter`] that picks a backend and runs requests through it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{Instrument, debug, info, info_span, instrument, warn};
use uuid::Uuid;

use crate::backend::{AnyBackend, NativeBackend, SegmentRequest, SegmentationBackend, SubprocessBackend};
use crate::config::{BackendPreference, SegmentationConfig};
use crate::decode::decode_image;
use crate::detection::build_standard_pipeline;
use crate::error::{Result, SegmentError};
use crate::models::{ImageDimensions, SegmentationResult};

/// Per-call knobs for [`segment_page_with`]
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Abandon the pipeline (TimeoutError) once this much time has passed
    pub budget: Option<Duration>,
    /// Dump every step's intermediate images here (must be empty or absent)
    pub debug_dir: Option<PathBuf>,
}

/// Segment one page in the calling thread with default run options
pub fn segment_page(bytes: &[u8], allow_data_uri: bool, config: &SegmentationConfig) -> Result<SegmentationResult> {
    segment_page_with(bytes, allow_data_uri, config, &RunOptions::default())
}

/// Decode, detect, filter, order and crop one page.
///
/// Either every panel is returned or an error is; there is no partial result.
#[instrument(skip_all, fields(bytes = bytes.len()))]
pub fn segment_page_with(
    bytes: &[u8],
    allow_data_uri: bool,
    config: &SegmentationConfig,
    options: &RunOptions,
) -> Result<SegmentationResult> {
    let started = Instant::now();
    config.validate()?;

    let mut pipeline = build_standard_pipeline(config);
    if let Some(budget) = options.budget {
        pipeline = pipeline.with_budget(budget);
    }
    if let Some(dir) = &options.debug_dir {
        pipeline = pipeline.with_debug(dir.clone())?;
    }

    let decoded = decode_image(bytes, allow_data_uri, &config.decoder)?;
    let original_image = ImageDimensions {
        width: decoded.width(),
        height: decoded.height(),
    };

    let data = pipeline.run(decoded.image)?;
    let fallback = data.get_bool("fallback").unwrap_or(false);
    let result = SegmentationResult::from_panels(original_image, data.panels)?;

    info!(
        width = original_image.width,
        height = original_image.height,
        panels = result.total_panels,
        fallback,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "segmented page"
    );
    Ok(result)
}

/// Async facade over whichever backend is usable in this environment.
///
/// Cheap to share behind an `Arc`; requests don't share any mutable state.
pub struct Segmenter {
    config: Arc<SegmentationConfig>,
    backend: Option<AnyBackend>,
}

impl Segmenter {
    /// Probe the backends allowed by `config.runtime.backend` and keep the first usable one.
    /// Finding none is not an error here; requests will fail with `Unavailable`.
    pub fn discover(config: SegmentationConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let candidates: Vec<AnyBackend> = match config.runtime.backend {
            BackendPreference::Native => vec![NativeBackend::new(Arc::clone(&config)).into()],
            BackendPreference::Subprocess => vec![SubprocessBackend::new(Arc::clone(&config)).into()],
            BackendPreference::Auto => vec![
                NativeBackend::new(Arc::clone(&config)).into(),
                SubprocessBackend::new(Arc::clone(&config)).into(),
            ],
        };

        let mut selected = None;
        for backend in candidates {
            match backend.probe() {
                Ok(()) => {
                    debug!(backend = backend.name(), "backend available");
                    selected = Some(backend);
                    break;
                }
                Err(e) => debug!(backend = backend.name(), reason = %e, "backend unavailable"),
            }
        }
        if selected.is_none() {
            warn!("no image processing backend available");
        }

        Ok(Self { config, backend: selected })
    }

    /// Use a specific backend, skipping discovery
    pub fn with_backend(config: SegmentationConfig, backend: AnyBackend) -> Self {
        Self {
            config: Arc::new(config),
            backend: Some(backend),
        }
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    /// Name of the selected backend, if any
    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|b| b.name())
    }

    /// Whether segmentation can run at all. Never touches image data.
    pub fn probe_availability(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.probe().is_ok())
    }

    /// Segment one page. Each call is logged under its own request id.
    pub async fn segment_panels(&self, bytes: &[u8], allow_data_uri: bool) -> Result<SegmentationResult> {
        let request_id = Uuid::new_v4();
        let span = info_span!("segment_panels", %request_id, bytes = bytes.len());

        async move {
            let Some(backend) = &self.backend else {
                return Err(SegmentError::Unavailable(
                    "no segmentation backend is usable; set runtime.subprocess.program or PANELCUT_WORKER \
                     to a panelcut worker, or build with PNG and JPEG support in the image crate"
                        .to_string(),
                ));
            };

            let started = Instant::now();
            let request = SegmentRequest {
                bytes: bytes.to_vec(),
                allow_data_uri,
            };
            let outcome = backend.segment(request).await;
            match &outcome {
                Ok(result) => info!(
                    backend = backend.name(),
                    panels = result.total_panels,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "request finished"
                ),
                Err(e) => warn!(backend = backend.name(), kind = ?e.kind(), error = %e, "request failed"),
            }
            outcome
        }
        .instrument(span)
        .await
    }
}
