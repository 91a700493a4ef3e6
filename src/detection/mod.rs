pub mod preprocessing;
pub mod contours;
pub mod filter;
pub mod ordering;
pub mod crop;
pub mod steps;

use crate::config::SegmentationConfig;
use crate::pipeline::Pipeline;

/// Padding kept around the content when trimming black scan margins
const MARGIN_PADDING: u32 = 5;

/// Build the standard panel segmentation pipeline from a validated config
pub fn build_standard_pipeline(config: &SegmentationConfig) -> Pipeline {
    use crate::detection::steps::*;
    use std::sync::Arc;

    let detector = &config.detector;

    let mut pipeline = Pipeline::new()
        .add_step(Arc::new(GrayscaleStep))
        .add_step(Arc::new(GutterEstimationStep {
            tone: detector.gutter,
            dark_level: detector.dark_margin_level,
        }));

    if detector.trim_dark_margins {
        pipeline = pipeline.add_step(Arc::new(MarginTrimStep {
            dark_level: detector.dark_margin_level,
            padding: MARGIN_PADDING,
        }));
    }
    if detector.blur_sigma > 0.0 {
        pipeline = pipeline.add_step(Arc::new(BlurStep { sigma: detector.blur_sigma }));
    }

    pipeline = pipeline.add_step(Arc::new(ThresholdStep {
        method: detector.threshold,
        min_contrast: detector.min_contrast,
    }));

    if detector.gap_closing_radius > 0 {
        pipeline = pipeline.add_step(Arc::new(GapClosingStep {
            radius: detector.gap_closing_radius,
        }));
    }

    let gates = GateSettings::from_config(detector);
    pipeline = pipeline.add_step(Arc::new(ContourDetectionStep { gates }));

    if detector.adaptive_retry {
        pipeline = pipeline.add_step(Arc::new(AdaptiveRetryStep {
            gates,
            blur_sigma: detector.blur_sigma,
            closing_radius: detector.gap_closing_radius,
            min_contrast: detector.min_contrast,
        }));
    }

    pipeline
        .add_step(Arc::new(GeometricFilterStep {
            min_area_fraction: detector.min_area_fraction,
            filter: config.filter.clone(),
        }))
        .add_step(Arc::new(ReadingOrderStep {
            config: config.reading_order.clone(),
        }))
        .add_step(Arc::new(PanelCropStep {
            output: config.output.clone(),
        }))
}
