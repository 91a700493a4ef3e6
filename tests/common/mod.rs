#![allow(dead_code)]

mod fixtures;
pub use fixtures::*;

use panelcut::{SegmentationConfig, SegmentationResult};

/// Segment an in-memory page with `config`, panicking on failure
pub fn segment(image: &image::DynamicImage, config: &SegmentationConfig) -> SegmentationResult {
    panelcut::segment_page(&encode_png(image), true, config).expect("segmentation failed")
}

/// Panel boxes of a result in reading order
pub fn boxes(result: &SegmentationResult) -> Vec<panelcut::BoundingBox> {
    result.panels.iter().map(|p| p.bounding_box).collect()
}
