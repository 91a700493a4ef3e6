use image::{DynamicImage, GenericImageView, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::config::GutterTone;
use crate::error::{Result, SegmentError};
use crate::models::{Candidate, Panel, PanelPlacement};

/// Bounding box in the original image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Box covering a whole `width` x `height` image
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Exclusive right edge
    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True when the box is non-empty and lies inside `[0,width) x [0,height)`
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        !self.is_empty() && self.right() <= width as u64 && self.bottom() <= height as u64
    }

    /// Shift by a region-of-interest origin
    pub fn translate(&self, dx: u32, dy: u32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Cut the box down to the image; None if nothing is left
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let right = self.right().min(width as u64) as u32;
        let bottom = self.bottom().min(height as u64) as u32;
        let clamped = Self::new(self.x, self.y, right - self.x, bottom - self.y);
        (!clamped.is_empty()).then_some(clamped)
    }

    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x as u64 || bottom <= y as u64 {
            return None;
        }
        Some(Self::new(x, y, (right - x as u64) as u32, (bottom - y as u64) as u32))
    }

    /// Intersection over union, 0.0 for disjoint boxes
    pub fn iou(&self, other: &Self) -> f32 {
        let inter = self.intersection(other).map(|b| b.area()).unwrap_or(0);
        if inter == 0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        inter as f32 / union as f32
    }

    /// Whether `inner` lies within this box on all four sides, allowing
    /// `tolerance` (a fraction of this box's width/height) of overhang.
    pub fn contains_with_tolerance(&self, inner: &Self, tolerance: f32) -> bool {
        let tol_x = (self.width as f32 * tolerance).ceil() as i64;
        let tol_y = (self.height as f32 * tolerance).ceil() as i64;

        inner.x as i64 >= self.x as i64 - tol_x
            && inner.y as i64 >= self.y as i64 - tol_y
            && inner.right() as i64 <= self.right() as i64 + tol_x
            && inner.bottom() as i64 <= self.bottom() as i64 + tol_y
    }

    pub fn vertical_overlap(&self, top: u64, bottom: u64) -> u64 {
        self.bottom().min(bottom).saturating_sub((self.y as u64).max(top))
    }
}

/// Metadata value types
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Bool(bool),
    String(String),
    Int(i64),
}

/// State of one page as it moves through the pipeline.
/// Each step reads what earlier steps produced and fills in its own part.
#[derive(Clone)]
pub struct PipelineData {
    /// The decoded page (shared efficiently via Arc)
    pub original: Arc<DynamicImage>,

    /// Working raster of the current step: grayscale, blurred, mask, ...
    pub working: DynamicImage,

    /// Region of `original` that `working` covers
    pub roi: BoundingBox,

    /// Gutter tone once estimated (never `Auto` after the estimation step)
    pub gutter: Option<GutterTone>,

    /// Raw detector output, page coordinates
    pub candidates: Vec<Candidate>,

    /// Filtered panel boxes, unordered
    pub boxes: Vec<BoundingBox>,

    /// Boxes in reading order with their panel numbers
    pub placements: Vec<PanelPlacement>,

    /// Cropped and encoded panels
    pub panels: Vec<Panel>,

    /// Step diagnostics (e.g. "threshold_level", "fallback")
    pub metadata: HashMap<String, MetadataValue>,
}

impl PipelineData {
    /// Create PipelineData for a full page
    pub fn from_image(image: DynamicImage) -> Self {
        let roi = BoundingBox::full(image.width(), image.height());
        let original = Arc::new(image);
        Self {
            working: original.as_ref().clone(),
            original,
            roi,
            gutter: None,
            candidates: Vec::new(),
            boxes: Vec::new(),
            placements: Vec::new(),
            panels: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn page_size(&self) -> (u32, u32) {
        self.original.dimensions()
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: MetadataValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Get metadata as bool
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.metadata.get(key) {
            Some(MetadataValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get metadata as int
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.metadata.get(key) {
            Some(MetadataValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get metadata as string
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.metadata.get(key) {
            Some(MetadataValue::String(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Boxes to draw for a debug overlay, the most refined set available
    fn overlay_boxes(&self) -> Vec<BoundingBox> {
        if !self.placements.is_empty() {
            self.placements.iter().map(|p| p.bbox).collect()
        } else if !self.boxes.is_empty() {
            self.boxes.clone()
        } else {
            self.candidates.iter().map(|c| c.bbox).collect()
        }
    }
}

/// Debug configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Root directory for debug outputs
    pub output_dir: PathBuf,
    /// Whether debug mode is enabled
    pub enabled: bool,
}

/// Context available to all pipeline steps
#[derive(Clone, Default)]
pub struct PipelineContext {
    pub debug: Option<DebugConfig>,
    /// Abandon the run once this instant has passed
    pub deadline: Option<Instant>,
    /// Budget the deadline was derived from, for error reporting
    pub budget: Option<std::time::Duration>,
}

impl PipelineContext {
    fn check_deadline(&self) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(SegmentError::Timeout(
                self.budget.unwrap_or_default(),
            )),
            _ => Ok(()),
        }
    }
}

/// Trait that all pipeline steps must implement
pub trait PipelineStep: Send + Sync {
    /// Transform the page state. Steps must not drop what earlier steps produced
    /// unless they replace it.
    fn process(&self, data: PipelineData, context: &PipelineContext) -> Result<PipelineData>;

    /// Human-readable name for this step (used in logs and debug folder names)
    fn name(&self) -> &str;
}

/// Composable pipeline builder
pub struct Pipeline {
    steps: Vec<Arc<dyn PipelineStep>>,
    context: PipelineContext,
}

impl Pipeline {
    /// Create a new empty pipeline
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            context: PipelineContext::default(),
        }
    }

    /// Enable debug mode with output directory
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self> {
        let io_err = |e: std::io::Error| {
            SegmentError::Processing(format!("debug directory {}: {}", output_dir.display(), e))
        };
        // Check if directory exists and is empty
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir).map_err(io_err)?;
            if entries.count() > 0 {
                return Err(SegmentError::InvalidConfig(format!(
                    "Debug directory is not empty: {}",
                    output_dir.display()
                )));
            }
        } else {
            // Create directory if it doesn't exist
            std::fs::create_dir_all(&output_dir).map_err(io_err)?;
        }

        self.context.debug = Some(DebugConfig {
            output_dir,
            enabled: true,
        });

        Ok(self)
    }

    /// Stop between steps once `budget` has elapsed from now
    pub fn with_budget(mut self, budget: std::time::Duration) -> Self {
        self.context.deadline = Some(Instant::now() + budget);
        self.context.budget = Some(budget);
        self
    }

    /// Add a processing step to the pipeline
    pub fn add_step(mut self, step: Arc<dyn PipelineStep>) -> Self {
        self.steps.push(step);
        self
    }

    /// Helper method to add a step from a Box (for convenience)
    pub fn add_step_boxed(mut self, step: Box<dyn PipelineStep>) -> Self {
        self.steps.push(Arc::from(step));
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step on the page
    pub fn run(&self, input: DynamicImage) -> Result<PipelineData> {
        self.run_partial(input, self.steps.len())
    }

    /// Run the pipeline but stop after `num_steps` steps (useful for debugging)
    pub fn run_partial(&self, input: DynamicImage, num_steps: usize) -> Result<PipelineData> {
        if let Some(debug_config) = self.context.debug.as_ref().filter(|d| d.enabled) {
            let input_dir = debug_config.output_dir.join("00_input");
            save_debug_image(&input_dir.join("page.png"), &input)?;
            debug!("saved 00_input/page.png");
        }

        let mut data = PipelineData::from_image(input);

        for (step_idx, step) in self.steps.iter().enumerate().take(num_steps) {
            self.context.check_deadline()?;

            let started = Instant::now();
            data = step.process(data, &self.context)?;
            debug!(
                step = step.name(),
                elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                candidates = data.candidates.len(),
                boxes = data.boxes.len(),
                panels = data.panels.len(),
                "step finished"
            );

            self.save_step_output(step_idx, step.name(), &data)?;
        }

        Ok(data)
    }

    /// Save debug outputs for this step: the working raster and, once boxes exist, an overlay
    fn save_step_output(&self, step_idx: usize, step_name: &str, data: &PipelineData) -> Result<()> {
        let Some(debug_config) = self.context.debug.as_ref().filter(|d| d.enabled) else {
            return Ok(());
        };

        let step_dir_name = format!("{:02}_{}", step_idx + 1,
            step_name.to_lowercase().replace(' ', "_"));
        let step_dir = debug_config.output_dir.join(&step_dir_name);

        save_debug_image(&step_dir.join("working.png"), &data.working)?;

        let boxes = data.overlay_boxes();
        if !boxes.is_empty() {
            let overlay = draw_boxes(&data.original, &boxes);
            save_debug_image(&step_dir.join("boxes.png"), &DynamicImage::ImageRgb8(overlay))?;
        }

        debug!("saved debug output to {}/", step_dir_name);
        Ok(())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn save_debug_image(path: &std::path::Path, image: &DynamicImage) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SegmentError::Processing(format!("Failed to create {}: {}", parent.display(), e)))?;
    }
    image
        .save(path)
        .map_err(|e| SegmentError::Processing(format!("Failed to save debug image: {}", e)))
}

/// Draw boxes (red, 3px) over an RGB copy of the page
pub fn draw_boxes(page: &DynamicImage, boxes: &[BoundingBox]) -> RgbImage {
    let mut canvas = page.to_rgb8();
    for bbox in boxes {
        for inset in 0..3u32 {
            if bbox.width <= 2 * inset || bbox.height <= 2 * inset {
                break;
            }
            let rect = Rect::at((bbox.x + inset) as i32, (bbox.y + inset) as i32)
                .of_size(bbox.width - 2 * inset, bbox.height - 2 * inset);
            draw_hollow_rect_mut(&mut canvas, rect, image::Rgb([220u8, 20, 60]));
        }
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox::new(10, 10, 100, 50);
        assert_eq!(a.iou(&a), 1.0);
        let b = BoundingBox::new(200, 10, 100, 50);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = BoundingBox::new(0, 0, 100, 100);
        let b = BoundingBox::new(50, 0, 100, 100);
        // 5000 / 15000
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn touching_boxes_do_not_intersect() {
        let a = BoundingBox::new(0, 0, 100, 100);
        let b = BoundingBox::new(100, 0, 100, 100);
        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn containment_respects_tolerance() {
        let outer = BoundingBox::new(100, 100, 200, 200);
        let inner = BoundingBox::new(120, 120, 50, 50);
        assert!(outer.contains_with_tolerance(&inner, 0.0));

        // Sticks out 3px on the left; 2% of 200 = 4px of slack
        let overhang = BoundingBox::new(97, 120, 50, 50);
        assert!(!outer.contains_with_tolerance(&overhang, 0.0));
        assert!(outer.contains_with_tolerance(&overhang, 0.02));
        assert!(!outer.contains_with_tolerance(&BoundingBox::new(90, 120, 50, 50), 0.02));
    }

    #[test]
    fn clamp_cuts_to_image() {
        let b = BoundingBox::new(90, 90, 50, 50);
        assert_eq!(b.clamp_to(100, 100), Some(BoundingBox::new(90, 90, 10, 10)));
        assert_eq!(BoundingBox::new(100, 0, 5, 5).clamp_to(100, 100), None);
        assert!(b.clamp_to(100, 100).unwrap().fits_within(100, 100));
        assert!(!b.fits_within(100, 100));
    }

    #[test]
    fn vertical_overlap_against_band() {
        let b = BoundingBox::new(0, 50, 10, 100);
        assert_eq!(b.vertical_overlap(0, 100), 50);
        assert_eq!(b.vertical_overlap(200, 300), 0);
    }

    struct CountingStep;

    impl PipelineStep for CountingStep {
        fn process(&self, data: PipelineData, _context: &PipelineContext) -> Result<PipelineData> {
            let seen = data.get_int("steps").unwrap_or(0);
            Ok(data.with_metadata("steps", MetadataValue::Int(seen + 1)))
        }

        fn name(&self) -> &str {
            "Counting"
        }
    }

    #[test]
    fn run_partial_stops_early() {
        let pipeline = Pipeline::new()
            .add_step_boxed(Box::new(CountingStep))
            .add_step_boxed(Box::new(CountingStep))
            .add_step_boxed(Box::new(CountingStep));
        let page = DynamicImage::new_luma8(8, 8);

        assert_eq!(pipeline.run(page.clone()).unwrap().get_int("steps"), Some(3));
        assert_eq!(pipeline.run_partial(page, 2).unwrap().get_int("steps"), Some(2));
    }

    #[test]
    fn expired_budget_times_out_before_first_step() {
        let pipeline = Pipeline::new()
            .add_step_boxed(Box::new(CountingStep))
            .with_budget(std::time::Duration::ZERO);
        let result = pipeline.run(DynamicImage::new_luma8(8, 8));
        assert!(matches!(result, Err(SegmentError::Timeout(_))));
    }

    #[test]
    fn debug_dir_must_be_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("stale.txt"), b"x").unwrap();
        let result = Pipeline::new().with_debug(dir.path().to_path_buf());
        assert!(matches!(result, Err(SegmentError::InvalidConfig(_))));
    }
}
