use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::HashMap;
use crate::models::{Candidate, Contour};
use crate::pipeline::BoundingBox;

/// Size gates applied to raw regions before they become candidates
#[derive(Debug, Clone, Copy)]
pub struct RegionGates {
    /// Minimum bounding-box area in pixels
    pub min_area: u64,
    /// Maximum bounding-box area in pixels
    pub max_area: u64,
    pub min_width: u32,
    pub min_height: u32,
    /// Exclusive width/height bounds
    pub min_aspect: f32,
    pub max_aspect: f32,
}

impl RegionGates {
    fn accepts(&self, contour: &Contour) -> bool {
        let area = contour.bbox_area();
        let aspect = contour.aspect_ratio();
        area >= self.min_area
            && area <= self.max_area
            && contour.width() >= self.min_width
            && contour.height() >= self.min_height
            && aspect > self.min_aspect
            && aspect < self.max_aspect
    }
}

/// Find contours in a binary mask using connected components.
/// The result is sorted by position so it doesn't depend on label numbering.
pub fn find_contours(mask: &GrayImage) -> Vec<Contour> {
    // Label connected components (white pixels = content)
    let labeled = connected_components(mask, Connectivity::Eight, Luma([0]));

    // Build contours from labeled regions
    let mut regions: HashMap<u32, (u32, u32, u32, u32, u32)> = HashMap::new();

    for (x, y, label) in labeled.enumerate_pixels() {
        let label_val = label[0];
        if label_val == 0 {
            continue; // Skip background
        }

        regions.entry(label_val)
            .and_modify(|(min_x, min_y, max_x, max_y, count)| {
                *min_x = (*min_x).min(x);
                *min_y = (*min_y).min(y);
                *max_x = (*max_x).max(x);
                *max_y = (*max_y).max(y);
                *count += 1;
            })
            .or_insert((x, y, x, y, 1));
    }

    let mut contours: Vec<Contour> = regions.into_iter()
        .map(|(label, (min_x, min_y, max_x, max_y, count))| {
            Contour {
                label,
                min_x,
                min_y,
                max_x,
                max_y,
                pixel_count: count,
            }
        })
        .collect();

    contours.sort_by_key(|c| (c.min_y, c.min_x, c.max_y, c.max_x, c.pixel_count));
    contours
}

/// Turn mask regions into panel candidates in page coordinates.
/// `origin` is where the mask's (0, 0) sits on the page.
pub fn detect_candidates(mask: &GrayImage, origin: (u32, u32), gates: &RegionGates) -> Vec<Candidate> {
    select_candidates(&find_contours(mask), mask.dimensions(), origin, gates)
}

/// Apply the gates to contours of a `mask_size` mask.
///
/// A region too big to be a panel is a frame around everything inside it:
/// regions nested in it are dropped too. The exception is a border reaching
/// all four mask edges (leftover scan margin), whose contents are the panels.
pub fn select_candidates(
    contours: &[Contour],
    mask_size: (u32, u32),
    origin: (u32, u32),
    gates: &RegionGates,
) -> Vec<Candidate> {
    let (width, height) = mask_size;
    let frames: Vec<BoundingBox> = contours
        .iter()
        .filter(|c| c.bbox_area() > gates.max_area && !c.touches_all_edges(width, height))
        .map(|c| c.to_bounding_box(0, 0))
        .collect();

    contours
        .iter()
        .filter(|c| gates.accepts(c))
        .filter(|c| {
            let bbox = c.to_bounding_box(0, 0);
            !frames.iter().any(|frame| frame.contains_with_tolerance(&bbox, 0.0))
        })
        .map(|c| Candidate::from_contour(c, origin.0, origin.1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_with_rects(width: u32, height: u32, rects: &[(u32, u32, u32, u32)]) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let inside = rects
                .iter()
                .any(|&(rx, ry, rw, rh)| x >= rx && x < rx + rw && y >= ry && y < ry + rh);
            Luma([if inside { 255 } else { 0 }])
        })
    }

    #[test]
    fn separate_blocks_become_separate_contours() {
        let mask = mask_with_rects(100, 100, &[(60, 10, 30, 30), (10, 10, 30, 30), (10, 60, 80, 30)]);
        let contours = find_contours(&mask);
        assert_eq!(contours.len(), 3);
        // Sorted top-to-bottom, then left-to-right
        assert_eq!((contours[0].min_x, contours[0].min_y), (10, 10));
        assert_eq!((contours[1].min_x, contours[1].min_y), (60, 10));
        assert_eq!(contours[2].width(), 80);
        assert_eq!(contours[2].pixel_count, 80 * 30);
    }

    #[test]
    fn hollow_frame_is_one_region_covering_its_interior() {
        // 2px frame, like an inked panel border
        let mask = GrayImage::from_fn(60, 60, |x, y| {
            let on_frame = (5..55).contains(&x) && (5..55).contains(&y)
                && (x < 7 || x >= 53 || y < 7 || y >= 53);
            Luma([if on_frame { 255 } else { 0 }])
        });
        let candidates = detect_candidates(
            &mask,
            (0, 0),
            &RegionGates { min_area: 100, max_area: 3600, min_width: 10, min_height: 10, min_aspect: 0.2, max_aspect: 10.0 },
        );
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].bbox, BoundingBox::new(5, 5, 50, 50));
        assert!(candidates[0].score < 0.2);
    }

    #[test]
    fn gates_drop_small_regions_and_origin_is_applied() {
        let mask = mask_with_rects(100, 100, &[(0, 0, 5, 5), (20, 20, 60, 10)]);
        let gates = RegionGates { min_area: 50, max_area: 5000, min_width: 8, min_height: 8, min_aspect: 0.1, max_aspect: 10.0 };
        let candidates = detect_candidates(&mask, (100, 200), &gates);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].bbox, BoundingBox::new(120, 220, 60, 10));

        // A region framing the whole mask is not a panel
        let frame = mask_with_rects(100, 100, &[(0, 0, 100, 100)]);
        assert!(detect_candidates(&frame, (0, 0), &gates).is_empty());
    }

    fn hollow_frame(width: u32, height: u32, inset: u32) -> impl Fn(u32, u32) -> bool {
        move |x, y| {
            let inside = x >= inset && y >= inset && x < width - inset && y < height - inset;
            let rim = x < inset + 3 || y < inset + 3 || x >= width - inset - 3 || y >= height - inset - 3;
            inside && rim
        }
    }

    fn gates_for(width: u32, height: u32) -> RegionGates {
        RegionGates {
            min_area: 100,
            max_area: (width as u64 * height as u64) * 9 / 10,
            min_width: 10,
            min_height: 10,
            min_aspect: 0.2,
            max_aspect: 10.0,
        }
    }

    #[test]
    fn oversized_frame_swallows_its_contents() {
        // Frame 2px in from the edges, art inside it
        let frame = hollow_frame(100, 100, 2);
        let mask = GrayImage::from_fn(100, 100, |x, y| {
            let art = (40..60).contains(&x) && (40..60).contains(&y);
            Luma([if frame(x, y) || art { 255 } else { 0 }])
        });
        assert!(detect_candidates(&mask, (0, 0), &gates_for(100, 100)).is_empty());
    }

    #[test]
    fn border_on_every_edge_keeps_its_contents() {
        // Leftover scan margin touching all four edges, one panel inside
        let border = hollow_frame(100, 100, 0);
        let mask = GrayImage::from_fn(100, 100, |x, y| {
            let panel = (30..70).contains(&x) && (30..70).contains(&y);
            Luma([if border(x, y) || panel { 255 } else { 0 }])
        });
        let candidates = detect_candidates(&mask, (0, 0), &gates_for(100, 100));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].bbox, BoundingBox::new(30, 30, 40, 40));
    }

    #[test]
    fn slivers_fail_the_aspect_gate() {
        // 90x6 rule, 6x60 rule, and a 40x40 panel
        let mask = mask_with_rects(100, 100, &[(5, 2, 90, 6), (2, 20, 6, 60), (40, 40, 40, 40)]);
        let gates = RegionGates { min_width: 4, min_height: 4, ..gates_for(100, 100) };
        let candidates = detect_candidates(&mask, (0, 0), &gates);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].bbox, BoundingBox::new(40, 40, 40, 40));
    }

    #[test]
    fn empty_mask_has_no_contours() {
        let mask = GrayImage::new(30, 30);
        assert!(find_contours(&mask).is_empty());
    }
}
