use std::sync::Arc;

use image::ImageFormat;
use tracing::debug;

use crate::backend::{SegmentRequest, SegmentationBackend};
use crate::config::SegmentationConfig;
use crate::error::{Result, SegmentError};
use crate::models::SegmentationResult;
use crate::segmenter::{RunOptions, segment_page_with};

/// Runs the pipeline in-process on tokio's blocking pool
#[derive(Clone)]
pub struct NativeBackend {
    config: Arc<SegmentationConfig>,
}

impl NativeBackend {
    pub fn new(config: Arc<SegmentationConfig>) -> Self {
        Self { config }
    }
}

impl SegmentationBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn probe(&self) -> Result<()> {
        for format in [ImageFormat::Png, ImageFormat::Jpeg] {
            if !format.reading_enabled() {
                return Err(SegmentError::Unavailable(format!(
                    "image crate built without {:?} decoding",
                    format
                )));
            }
        }
        let output = self.config.output.format.image_format();
        if !output.writing_enabled() {
            return Err(SegmentError::Unavailable(format!(
                "image crate built without {:?} encoding",
                output
            )));
        }
        Ok(())
    }

    async fn segment(&self, request: SegmentRequest) -> Result<SegmentationResult> {
        let config = Arc::clone(&self.config);
        let budget = config.runtime.timeout();

        // The blocking thread can't be cancelled, so the pipeline also checks the
        // same budget between steps and gives the thread back promptly.
        let task = tokio::task::spawn_blocking(move || {
            let options = RunOptions {
                budget: Some(budget),
                debug_dir: None,
            };
            segment_page_with(&request.bytes, request.allow_data_uri, &config, &options)
        });

        match tokio::time::timeout(budget, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(SegmentError::Processing(format!(
                "segmentation task failed: {}",
                join_error
            ))),
            Err(_) => {
                debug!(budget_ms = budget.as_millis() as u64, "native segmentation timed out");
                Err(SegmentError::Timeout(budget))
            }
        }
    }
}
