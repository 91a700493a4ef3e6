use crate::config::{DetectorConfig, FilterConfig, GutterTone, OutputConfig, ReadingOrderConfig, ThresholdMethod};
use crate::detection::{contours, crop, filter, ordering, preprocessing};
use crate::error::Result;
use crate::pipeline::{MetadataValue, PipelineContext, PipelineData, PipelineStep};
use image::DynamicImage;
use tracing::{debug, warn};

/// Minimum box area for a page, from a fraction of its full area
fn min_area_for(data: &PipelineData, fraction: f32) -> u64 {
    let (width, height) = data.page_size();
    (width as f64 * height as f64 * fraction as f64).ceil() as u64
}

/// Region gates as configured, resolved against a page by `resolve`
#[derive(Debug, Clone, Copy)]
pub struct GateSettings {
    pub min_area_fraction: f32,
    /// Relative to the region of interest, not the page
    pub max_area_fraction: f32,
    pub min_width: u32,
    pub min_height: u32,
    pub min_aspect_ratio: f32,
    pub max_aspect_ratio: f32,
}

impl GateSettings {
    pub fn from_config(detector: &DetectorConfig) -> Self {
        Self {
            min_area_fraction: detector.min_area_fraction,
            max_area_fraction: detector.max_area_fraction,
            min_width: detector.min_panel_width,
            min_height: detector.min_panel_height,
            min_aspect_ratio: detector.min_aspect_ratio,
            max_aspect_ratio: detector.max_aspect_ratio,
        }
    }

    fn resolve(&self, data: &PipelineData) -> contours::RegionGates {
        contours::RegionGates {
            min_area: min_area_for(data, self.min_area_fraction),
            max_area: (data.roi.area() as f64 * self.max_area_fraction as f64).floor() as u64,
            min_width: self.min_width,
            min_height: self.min_height,
            min_aspect: self.min_aspect_ratio,
            max_aspect: self.max_aspect_ratio,
        }
    }
}

/// Convert the page to grayscale
pub struct GrayscaleStep;

impl PipelineStep for GrayscaleStep {
    fn process(&self, mut data: PipelineData, _context: &PipelineContext) -> Result<PipelineData> {
        let gray = preprocessing::to_grayscale(&data.original);
        data.working = DynamicImage::ImageLuma8(gray);
        Ok(data)
    }

    fn name(&self) -> &str {
        "Grayscale Conversion"
    }
}

/// Settle the gutter tone, sampling the page border when it is `Auto`
pub struct GutterEstimationStep {
    pub tone: GutterTone,
    /// Luma at or below which a pixel counts as scan margin
    pub dark_level: u8,
}

impl PipelineStep for GutterEstimationStep {
    fn process(&self, mut data: PipelineData, _context: &PipelineContext) -> Result<PipelineData> {
        let tone = match self.tone {
            GutterTone::Auto => preprocessing::estimate_gutter_tone(&data.working.to_luma8(), self.dark_level),
            fixed => fixed,
        };
        debug!(?tone, "gutter tone");
        data.gutter = Some(tone);
        let label = match tone {
            GutterTone::Dark => "dark",
            _ => "light",
        };
        Ok(data.with_metadata("gutter_tone", MetadataValue::String(label.to_string())))
    }

    fn name(&self) -> &str {
        "Gutter Estimation"
    }
}

/// Cut away black scan margins around a light-gutter page
pub struct MarginTrimStep {
    pub dark_level: u8,
    pub padding: u32,
}

impl PipelineStep for MarginTrimStep {
    fn process(&self, mut data: PipelineData, _context: &PipelineContext) -> Result<PipelineData> {
        // On a dark-gutter page the black border is the gutter itself
        if data.gutter == Some(GutterTone::Dark) {
            return Ok(data);
        }

        let gray = data.working.to_luma8();
        let Some(bounds) = preprocessing::content_bounds(&gray, self.dark_level, self.padding) else {
            return Ok(data);
        };
        if bounds == data.roi {
            return Ok(data);
        }

        debug!(?bounds, "trimmed dark margins");
        data.working = data.working.crop_imm(bounds.x, bounds.y, bounds.width, bounds.height);
        data.roi = bounds;
        Ok(data.with_metadata("margins_trimmed", MetadataValue::Bool(true)))
    }

    fn name(&self) -> &str {
        "Margin Trim"
    }
}

/// Apply Gaussian blur
pub struct BlurStep {
    pub sigma: f32,
}

impl PipelineStep for BlurStep {
    fn process(&self, mut data: PipelineData, _context: &PipelineContext) -> Result<PipelineData> {
        let gray = data.working.to_luma8();
        let blurred = preprocessing::apply_blur(&gray, self.sigma);
        data.working = DynamicImage::ImageLuma8(blurred);
        Ok(data)
    }

    fn name(&self) -> &str {
        "Gaussian Blur"
    }
}

/// Split the working raster into content (white) and gutter (black)
pub struct ThresholdStep {
    pub method: ThresholdMethod,
    pub min_contrast: u8,
}

impl PipelineStep for ThresholdStep {
    fn process(&self, mut data: PipelineData, _context: &PipelineContext) -> Result<PipelineData> {
        let gray = data.working.to_luma8();
        let tone = data.gutter.unwrap_or(GutterTone::Light);
        let (mask, level) = preprocessing::binarize(&gray, self.method, tone, self.min_contrast);
        data.working = DynamicImage::ImageLuma8(mask);

        match level {
            Some(level) => {
                debug!(level, "threshold level");
                Ok(data.with_metadata("threshold_level", MetadataValue::Int(level as i64)))
            }
            None => Ok(data),
        }
    }

    fn name(&self) -> &str {
        "Threshold"
    }
}

/// Close small breaks in panel borders
pub struct GapClosingStep {
    pub radius: u8,
}

impl PipelineStep for GapClosingStep {
    fn process(&self, mut data: PipelineData, _context: &PipelineContext) -> Result<PipelineData> {
        let mask = data.working.to_luma8();
        data.working = DynamicImage::ImageLuma8(preprocessing::close_gaps(&mask, self.radius));
        Ok(data)
    }

    fn name(&self) -> &str {
        "Gap Closing"
    }
}

/// Extract candidate panel boxes from the mask, in page coordinates
pub struct ContourDetectionStep {
    pub gates: GateSettings,
}

impl PipelineStep for ContourDetectionStep {
    fn process(&self, mut data: PipelineData, _context: &PipelineContext) -> Result<PipelineData> {
        let mask = data.working.to_luma8();
        let gates = self.gates.resolve(&data);
        let regions = contours::find_contours(&mask);
        let raw_regions = regions.len();
        data.candidates =
            contours::select_candidates(&regions, mask.dimensions(), (data.roi.x, data.roi.y), &gates);
        debug!(raw_regions, candidates = data.candidates.len(), "contours");

        Ok(data.with_metadata("raw_regions", MetadataValue::Int(raw_regions as i64)))
    }

    fn name(&self) -> &str {
        "Contour Detection"
    }
}

/// Local-mean thresholds tried, in order, when too few candidates were found
const RETRY_THRESHOLDS: [(u32, i16); 4] = [(7, 5), (7, 10), (10, 5), (10, 10)];

/// Retry stops once this many candidates are known
const RETRY_ENOUGH: usize = 3;

/// Rerun detection with adaptive thresholds when fewer than two candidates came out.
///
/// Reads the original page inside the region of interest, not `working`.
/// A retry candidate is kept unless more than half of it is already covered
/// by a known candidate.
pub struct AdaptiveRetryStep {
    pub gates: GateSettings,
    pub blur_sigma: f32,
    pub closing_radius: u8,
    pub min_contrast: u8,
}

impl PipelineStep for AdaptiveRetryStep {
    fn process(&self, mut data: PipelineData, _context: &PipelineContext) -> Result<PipelineData> {
        if data.candidates.len() >= 2 {
            return Ok(data);
        }

        let roi = data.roi;
        let mut gray = preprocessing::to_grayscale(&data.original.crop_imm(roi.x, roi.y, roi.width, roi.height));
        if self.blur_sigma > 0.0 {
            gray = preprocessing::apply_blur(&gray, self.blur_sigma);
        }
        let tone = data.gutter.unwrap_or(GutterTone::Light);
        let gates = self.gates.resolve(&data);

        let before = data.candidates.len();
        for (block_radius, offset) in RETRY_THRESHOLDS {
            if data.candidates.len() >= RETRY_ENOUGH {
                break;
            }
            let method = ThresholdMethod::Adaptive { block_radius, offset };
            let (mask, _) = preprocessing::binarize(&gray, method, tone, self.min_contrast);
            let mask = preprocessing::close_gaps(&mask, self.closing_radius);
            let regions = contours::find_contours(&mask);

            for candidate in contours::select_candidates(&regions, mask.dimensions(), (roi.x, roi.y), &gates) {
                let covered = data
                    .candidates
                    .iter()
                    .filter_map(|known| known.bbox.intersection(&candidate.bbox))
                    .map(|overlap| overlap.area())
                    .max()
                    .unwrap_or(0);
                if covered * 2 <= candidate.bbox.area() {
                    data.candidates.push(candidate);
                }
            }
            debug!(block_radius, offset, candidates = data.candidates.len(), "adaptive retry");
        }

        let added = data.candidates.len() - before;
        Ok(data.with_metadata("retry_candidates", MetadataValue::Int(added as i64)))
    }

    fn name(&self) -> &str {
        "Adaptive Retry"
    }
}

/// Remove noise, nested boxes and duplicates; fall back to the full page if nothing is left
pub struct GeometricFilterStep {
    pub min_area_fraction: f32,
    pub filter: FilterConfig,
}

impl PipelineStep for GeometricFilterStep {
    fn process(&self, mut data: PipelineData, _context: &PipelineContext) -> Result<PipelineData> {
        let (width, height) = data.page_size();
        let params = filter::FilterParams {
            min_area: min_area_for(&data, self.min_area_fraction),
            containment_tolerance: self.filter.containment_tolerance,
            dedup_iou_threshold: self.filter.dedup_iou_threshold,
            fallback_full_page: self.filter.fallback_full_page,
        };
        let outcome = filter::filter_candidates(&data.candidates, width, height, &params);
        if outcome.fallback {
            warn!(
                candidates = data.candidates.len(),
                "no panels detected, using the full page as a single panel"
            );
        }
        data.boxes = outcome.boxes;

        Ok(data.with_metadata("fallback", MetadataValue::Bool(outcome.fallback)))
    }

    fn name(&self) -> &str {
        "Geometric Filter"
    }
}

/// Number the boxes in manga reading order
pub struct ReadingOrderStep {
    pub config: ReadingOrderConfig,
}

impl PipelineStep for ReadingOrderStep {
    fn process(&self, mut data: PipelineData, _context: &PipelineContext) -> Result<PipelineData> {
        data.placements = ordering::resolve_reading_order(&data.boxes, &self.config);
        Ok(data)
    }

    fn name(&self) -> &str {
        "Reading Order"
    }
}

/// Crop every placed panel from the original page and encode it
pub struct PanelCropStep {
    pub output: OutputConfig,
}

impl PipelineStep for PanelCropStep {
    fn process(&self, mut data: PipelineData, _context: &PipelineContext) -> Result<PipelineData> {
        data.panels = data
            .placements
            .iter()
            .map(|placement| crop::extract_panel(&data.original, placement, &self.output))
            .collect::<Result<Vec<_>>>()?;
        Ok(data)
    }

    fn name(&self) -> &str {
        "Panel Crop"
    }
}
