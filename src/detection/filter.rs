//! Cleans detector output into a set of distinct panel boxes.
//!
//! Rules run in a fixed order: min-area, nested removal, IoU dedup, then the
//! full-page fallback. Surviving boxes never overlap above the dedup threshold.

use std::cmp::Reverse;

use tracing::debug;

use crate::models::Candidate;
use crate::pipeline::BoundingBox;

#[derive(Debug, Clone, Copy)]
pub struct FilterParams {
    /// Minimum box area in pixels
    pub min_area: u64,
    pub containment_tolerance: f32,
    pub dedup_iou_threshold: f32,
    pub fallback_full_page: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub boxes: Vec<BoundingBox>,
    /// True when `boxes` is the synthetic full-page panel
    pub fallback: bool,
}

pub fn filter_candidates(
    candidates: &[Candidate],
    page_width: u32,
    page_height: u32,
    params: &FilterParams,
) -> FilterOutcome {
    // 1. Anti-noise, after clamping to the page
    let mut boxes: Vec<BoundingBox> = candidates
        .iter()
        .filter_map(|c| c.bbox.clamp_to(page_width, page_height))
        .filter(|b| b.area() >= params.min_area)
        .collect();
    let after_area = boxes.len();

    // Largest first, so a box is only ever tested against bigger-or-equal survivors
    boxes.sort_by_key(|b| (Reverse(b.area()), b.y, b.x, b.width, b.height));

    // 2. Nested false positives (speech bubbles, insets)
    let boxes = remove_nested(boxes, params.containment_tolerance);
    let after_nesting = boxes.len();

    // 3. Same panel detected twice
    let boxes = deduplicate(boxes, params.dedup_iou_threshold);

    debug!(
        candidates = candidates.len(),
        after_area,
        after_nesting,
        after_dedup = boxes.len(),
        "filtered candidates"
    );

    // 4. Nothing usable: hand back the page itself
    if boxes.is_empty() && params.fallback_full_page && page_width > 0 && page_height > 0 {
        return FilterOutcome {
            boxes: vec![BoundingBox::full(page_width, page_height)],
            fallback: true,
        };
    }

    FilterOutcome { boxes, fallback: false }
}

/// Drop every box contained in an earlier (larger) survivor. Input must be sorted largest first.
fn remove_nested(sorted: Vec<BoundingBox>, tolerance: f32) -> Vec<BoundingBox> {
    let mut kept: Vec<BoundingBox> = Vec::with_capacity(sorted.len());
    for bbox in sorted {
        if !kept.iter().any(|outer| outer.contains_with_tolerance(&bbox, tolerance)) {
            kept.push(bbox);
        }
    }
    kept
}

/// Drop every box whose IoU with an earlier (larger) survivor exceeds `threshold`
fn deduplicate(sorted: Vec<BoundingBox>, threshold: f32) -> Vec<BoundingBox> {
    let mut kept: Vec<BoundingBox> = Vec::with_capacity(sorted.len());
    for bbox in sorted {
        if !kept.iter().any(|k| k.iou(&bbox) > threshold) {
            kept.push(bbox);
        }
    }
    kept
}
