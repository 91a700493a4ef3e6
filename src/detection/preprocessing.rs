use std::collections::HashSet;

use image::{DynamicImage, GrayImage, Luma, imageops};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::filter::{box_filter, gaussian_blur_f32};
use imageproc::morphology::close;
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::config::{GutterTone, ThresholdMethod};
use crate::pipeline::BoundingBox;

const FOREGROUND: Luma<u8> = Luma([255u8]);
const BACKGROUND: Luma<u8> = Luma([0u8]);

/// Luma separating dark from light when judging the gutter
const MID_LUMA: u8 = 128;

/// Convert image to grayscale
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    img.to_luma8()
}

/// Apply Gaussian blur to reduce noise (screentone, JPEG artifacts)
pub fn apply_blur(img: &GrayImage, sigma: f32) -> GrayImage {
    gaussian_blur_f32(img, sigma)
}

/// Decide the gutter tone. Never returns `Auto`.
///
/// A light outer ring means light gutters. A dark ring is either the gutter
/// itself or a scanner margin around light paper: dark gutters run between the
/// panels, so only they cross the paper (everything brighter than `dark_level`)
/// from one edge to the opposite one.
pub fn estimate_gutter_tone(gray: &GrayImage, dark_level: u8) -> GutterTone {
    if ring_mean(gray) >= MID_LUMA as u64 {
        return GutterTone::Light;
    }
    match content_bounds(gray, dark_level, 0) {
        Some(paper) if !dark_crosses(gray, &paper) => GutterTone::Light,
        _ => GutterTone::Dark,
    }
}

/// Mean luma of the outer ring, `max(1, min(w, h) / 50)` px thick
fn ring_mean(gray: &GrayImage) -> u64 {
    let (width, height) = gray.dimensions();
    let ring = (width.min(height) / 50).max(1);

    let mut sum: u64 = 0;
    let mut count: u64 = 0;
    for (x, y, pixel) in gray.enumerate_pixels() {
        let on_ring = x < ring || y < ring || x >= width.saturating_sub(ring) || y >= height.saturating_sub(ring);
        if on_ring {
            sum += pixel[0] as u64;
            count += 1;
        }
    }
    if count == 0 { u8::MAX as u64 } else { sum / count }
}

/// Whether one dark region inside `area` joins its top and bottom or its left and right edges
fn dark_crosses(gray: &GrayImage, area: &BoundingBox) -> bool {
    let region = imageops::crop_imm(gray, area.x, area.y, area.width, area.height).to_image();
    let (width, height) = region.dimensions();
    let dark = GrayImage::from_fn(width, height, |x, y| {
        if region.get_pixel(x, y)[0] < MID_LUMA { FOREGROUND } else { BACKGROUND }
    });
    let labels = connected_components(&dark, Connectivity::Eight, BACKGROUND);

    let edge = |points: &mut dyn Iterator<Item = (u32, u32)>| -> HashSet<u32> {
        points
            .map(|(x, y)| labels.get_pixel(x, y)[0])
            .filter(|&label| label != 0)
            .collect()
    };
    let top = edge(&mut (0..width).map(|x| (x, 0)));
    let bottom = edge(&mut (0..width).map(|x| (x, height - 1)));
    let left = edge(&mut (0..height).map(|y| (0, y)));
    let right = edge(&mut (0..height).map(|y| (width - 1, y)));

    !top.is_disjoint(&bottom) || !left.is_disjoint(&right)
}

/// Bounding box of everything brighter than `dark_level`, padded and clamped.
/// None when the whole page is dark.
pub fn content_bounds(gray: &GrayImage, dark_level: u8, padding: u32) -> Option<BoundingBox> {
    let (width, height) = gray.dimensions();
    let mut min_x = width;
    let mut min_y = height;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut has_content = false;

    for (x, y, pixel) in gray.enumerate_pixels() {
        if pixel[0] > dark_level {
            has_content = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    if !has_content {
        return None;
    }

    let x = min_x.saturating_sub(padding);
    let y = min_y.saturating_sub(padding);
    let right = (max_x + padding).min(width - 1);
    let bottom = (max_y + padding).min(height - 1);
    Some(BoundingBox::new(x, y, right - x + 1, bottom - y + 1))
}

/// Darkest and brightest luma on the page
pub fn luma_range(gray: &GrayImage) -> (u8, u8) {
    gray.pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])))
}

/// Split the page into content (255) and gutter (0).
///
/// Returns the mask and the global level used, if the method has one.
/// Pages with less contrast than `min_contrast` produce an empty mask.
pub fn binarize(
    gray: &GrayImage,
    method: ThresholdMethod,
    tone: GutterTone,
    min_contrast: u8,
) -> (GrayImage, Option<u8>) {
    let (width, height) = gray.dimensions();
    let (lo, hi) = luma_range(gray);
    if hi.saturating_sub(lo) < min_contrast {
        return (GrayImage::from_pixel(width, height, BACKGROUND), None);
    }

    // Light gutters: content is the darker side. Dark gutters: the brighter side.
    let dark_content = tone != GutterTone::Dark;

    match method {
        ThresholdMethod::Fixed { level } => (global_threshold(gray, level, dark_content), Some(level)),
        ThresholdMethod::Otsu => {
            let level = otsu_level(gray);
            (global_threshold(gray, level, dark_content), Some(level))
        }
        ThresholdMethod::Adaptive { block_radius, offset } => {
            let means = box_filter(gray, block_radius, block_radius);
            let mask = GrayImage::from_fn(width, height, |x, y| {
                let p = gray.get_pixel(x, y)[0] as i16;
                let m = means.get_pixel(x, y)[0] as i16;
                let is_content = if dark_content { p < m - offset } else { p > m + offset };
                if is_content { FOREGROUND } else { BACKGROUND }
            });
            (mask, None)
        }
    }
}

fn global_threshold(gray: &GrayImage, level: u8, dark_content: bool) -> GrayImage {
    let (width, height) = gray.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let p = gray.get_pixel(x, y)[0];
        let is_content = if dark_content { p <= level } else { p > level };
        if is_content { FOREGROUND } else { BACKGROUND }
    })
}

/// Morphological close so small breaks in panel borders don't split a panel
pub fn close_gaps(mask: &GrayImage, radius: u8) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    close(mask, Norm::LInf, radius)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with_block(width: u32, height: u32, background: u8, block: u8) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let inside = x >= width / 4 && x < 3 * width / 4 && y >= height / 4 && y < 3 * height / 4;
            Luma([if inside { block } else { background }])
        })
    }

    #[test]
    fn white_border_is_light_gutter() {
        assert_eq!(estimate_gutter_tone(&page_with_block(200, 100, 250, 20), 15), GutterTone::Light);
    }

    #[test]
    fn dark_border_running_between_panels_is_dark_gutter() {
        // Two light panels, the black gutter between them spans top to bottom
        let gray = GrayImage::from_fn(200, 100, |x, y| {
            let panel = (10..90).contains(&y) && ((10..95).contains(&x) || (105..190).contains(&x));
            Luma([if panel { 230 } else { 0 }])
        });
        assert_eq!(estimate_gutter_tone(&gray, 15), GutterTone::Dark);
    }

    #[test]
    fn black_scan_margin_around_paper_is_light_gutter() {
        // White paper inside a black margin, two inked panels well inside the paper
        let gray = GrayImage::from_fn(200, 100, |x, y| {
            let paper = (10..190).contains(&x) && (10..90).contains(&y);
            let ink = (20..30).contains(&y) && ((20..95).contains(&x) || (105..180).contains(&x));
            Luma([if !paper || ink { 0 } else { 255 }])
        });
        assert_eq!(estimate_gutter_tone(&gray, 15), GutterTone::Light);
    }

    #[test]
    fn otsu_marks_dark_block_as_content_on_light_page() {
        let gray = page_with_block(80, 80, 255, 40);
        let (mask, level) = binarize(&gray, ThresholdMethod::Otsu, GutterTone::Light, 24);
        assert!(level.is_some());
        assert_eq!(mask.get_pixel(40, 40)[0], 255);
        assert_eq!(mask.get_pixel(2, 2)[0], 0);
    }

    #[test]
    fn dark_gutter_inverts_the_mask() {
        let gray = page_with_block(80, 80, 0, 220);
        let (mask, _) = binarize(&gray, ThresholdMethod::Fixed { level: 128 }, GutterTone::Dark, 24);
        assert_eq!(mask.get_pixel(40, 40)[0], 255);
        assert_eq!(mask.get_pixel(2, 2)[0], 0);
    }

    #[test]
    fn flat_page_has_empty_mask() {
        let gray = GrayImage::from_pixel(50, 50, Luma([250u8]));
        let (mask, level) = binarize(&gray, ThresholdMethod::Otsu, GutterTone::Light, 24);
        assert!(level.is_none());
        assert!(mask.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn adaptive_threshold_finds_block_edges() {
        let gray = page_with_block(80, 80, 255, 40);
        let method = ThresholdMethod::Adaptive { block_radius: 5, offset: 8 };
        let (mask, _) = binarize(&gray, method, GutterTone::Light, 24);
        // Just inside the block edge the local mean is pulled up by the white gutter
        assert_eq!(mask.get_pixel(20, 40)[0], 255);
        assert_eq!(mask.get_pixel(2, 2)[0], 0);
    }

    #[test]
    fn content_bounds_skip_black_margin() {
        let gray = GrayImage::from_fn(100, 100, |x, y| {
            let in_margin = x < 10 || y < 10 || x >= 90 || y >= 90;
            Luma([if in_margin { 0 } else { 255 }])
        });
        let bounds = content_bounds(&gray, 15, 5).unwrap();
        assert_eq!(bounds, BoundingBox::new(5, 5, 90, 90));

        let black = GrayImage::from_pixel(10, 10, Luma([0u8]));
        assert!(content_bounds(&black, 15, 5).is_none());
    }

    #[test]
    fn close_bridges_small_gaps() {
        // Horizontal line with a 2px break
        let mask = GrayImage::from_fn(40, 9, |x, y| {
            Luma([if y == 4 && !(19..21).contains(&x) { 255 } else { 0 }])
        });
        let closed = close_gaps(&mask, 2);
        assert_eq!(closed.get_pixel(19, 4)[0], 255);
        assert_eq!(closed.get_pixel(20, 4)[0], 255);
    }
}
