//! Tunable parameters for decoding, detection, filtering, ordering and output.
//!
//! Every knob has a documented default and valid range. Values can come from a
//! JSON file, `PANELCUT_*` environment variables and the CLI, in that order of
//! increasing precedence. Call [`SegmentationConfig::validate`] before use; the
//! facade does this on every request.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmentError};

/// Colour of the space between panels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GutterTone {
    /// Decide from the page border
    #[default]
    Auto,
    /// White/light paper between panels (the usual case)
    Light,
    /// Black gutters, panel content is brighter than the background
    Dark,
}

impl std::str::FromStr for GutterTone {
    type Err = SegmentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(GutterTone::Auto),
            "light" | "white" => Ok(GutterTone::Light),
            "dark" | "black" => Ok(GutterTone::Dark),
            other => Err(SegmentError::InvalidConfig(format!("unknown gutter tone '{}'", other))),
        }
    }
}

/// How the grayscale page is split into gutter and content
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ThresholdMethod {
    /// Global level, 1-254
    Fixed { level: u8 },
    /// Global level picked by Otsu's method
    #[default]
    Otsu,
    /// Local mean over a (2r+1)² window; `offset` is subtracted from the mean (-64..=64)
    Adaptive { block_radius: u32, offset: i16 },
}

impl std::str::FromStr for ThresholdMethod {
    type Err = SegmentError;

    /// Accepts `otsu`, `adaptive`, `adaptive:R:C` or a bare level such as `200`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        if s == "otsu" {
            return Ok(ThresholdMethod::Otsu);
        }
        if let Some(rest) = s.strip_prefix("adaptive") {
            let parts: Vec<&str> = rest.split(':').filter(|p| !p.is_empty()).collect();
            return match parts.as_slice() {
                [] => Ok(ThresholdMethod::Adaptive { block_radius: 10, offset: 8 }),
                [radius, offset] => Ok(ThresholdMethod::Adaptive {
                    block_radius: radius.parse().map_err(|_| bad_threshold(&s))?,
                    offset: offset.parse().map_err(|_| bad_threshold(&s))?,
                }),
                _ => Err(bad_threshold(&s)),
            };
        }
        let level = s.strip_prefix("fixed:").unwrap_or(s.as_str());
        level
            .parse::<u8>()
            .map(|level| ThresholdMethod::Fixed { level })
            .map_err(|_| bad_threshold(&s))
    }
}

fn bad_threshold(s: &str) -> SegmentError {
    SegmentError::InvalidConfig(format!(
        "unknown threshold '{}' (expected otsu, adaptive[:radius:offset] or a level 1-254)",
        s
    ))
}

/// Encoding used for the cropped panels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelFormat {
    #[default]
    Png,
    Jpeg,
}

impl PanelFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            PanelFormat::Png => "png",
            PanelFormat::Jpeg => "jpg",
        }
    }

    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            PanelFormat::Png => image::ImageFormat::Png,
            PanelFormat::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

impl std::str::FromStr for PanelFormat {
    type Err = SegmentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "png" => Ok(PanelFormat::Png),
            "jpg" | "jpeg" => Ok(PanelFormat::Jpeg),
            other => Err(SegmentError::InvalidConfig(format!("unknown panel format '{}'", other))),
        }
    }
}

/// Which backend the facade may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// Native if it probes fine, then the subprocess worker
    #[default]
    Auto,
    Native,
    Subprocess,
}

impl std::str::FromStr for BackendPreference {
    type Err = SegmentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(BackendPreference::Auto),
            "native" => Ok(BackendPreference::Native),
            "subprocess" | "worker" => Ok(BackendPreference::Subprocess),
            other => Err(SegmentError::InvalidConfig(format!("unknown backend '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Largest accepted input buffer, in bytes (default 64 MiB)
    pub max_input_bytes: usize,
    /// Largest accepted page width in pixels (default 16384)
    pub max_width: u32,
    /// Largest accepted page height in pixels (default 16384)
    pub max_height: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: 64 * 1024 * 1024,
            max_width: 16384,
            max_height: 16384,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub gutter: GutterTone,
    pub threshold: ThresholdMethod,
    /// Gaussian sigma applied before thresholding, 0 disables (0.0..=10.0, default 1.0)
    pub blur_sigma: f32,
    /// Pages whose luma range is below this have no detectable content (default 24)
    pub min_contrast: u8,
    /// Radius of the morphological close that repairs broken borders (0..=16, default 1).
    /// A radius r also bridges gutters up to 2r px wide, merging the panels on either side.
    pub gap_closing_radius: u8,
    /// Crop away scanner black margins before detection on light-gutter pages
    pub trim_dark_margins: bool,
    /// Luma at or below which a margin pixel counts as black (default 15)
    pub dark_margin_level: u8,
    /// Minimum region bounding-box area as a fraction of the page ((0, 0.5], default 0.015)
    pub min_area_fraction: f32,
    /// Regions covering more than this fraction of the detection area are page
    /// frames, not panels ((min_area_fraction, 1], default 0.9)
    pub max_area_fraction: f32,
    /// Minimum panel width in pixels (default 32)
    pub min_panel_width: u32,
    /// Minimum panel height in pixels (default 32)
    pub min_panel_height: u32,
    /// Regions with width/height at or below this are rules or slivers ((0, 1], default 0.2)
    pub min_aspect_ratio: f32,
    /// Regions with width/height at or above this are rules or slivers ([1, 100], default 10)
    pub max_aspect_ratio: f32,
    /// Re-run detection with local-mean thresholds when the first pass finds fewer than 2 panels
    pub adaptive_retry: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            gutter: GutterTone::Auto,
            threshold: ThresholdMethod::Otsu,
            blur_sigma: 1.0,
            min_contrast: 24,
            gap_closing_radius: 1,
            trim_dark_margins: true,
            dark_margin_level: 15,
            min_area_fraction: 0.015,
            max_area_fraction: 0.9,
            min_panel_width: 32,
            min_panel_height: 32,
            min_aspect_ratio: 0.2,
            max_aspect_ratio: 10.0,
            adaptive_retry: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Slack for the nested-box test, fraction of the outer box dimension ([0, 0.1], default 0.02)
    pub containment_tolerance: f32,
    /// Boxes overlapping more than this IoU are the same panel ((0, 1], default 0.9)
    pub dedup_iou_threshold: f32,
    /// Emit one full-page panel when nothing survives (default true)
    pub fallback_full_page: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            containment_tolerance: 0.02,
            dedup_iou_threshold: 0.9,
            fallback_full_page: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadingOrderConfig {
    /// Vertical overlap, relative to the smaller height, that puts two boxes in one row ((0, 1], default 0.5)
    pub row_overlap_ratio: f32,
    /// Top edges closer than this fraction of the average panel height share a row ([0, 1], default 0.25)
    pub row_top_tolerance: f32,
    /// Boxes whose x differ by less than this fraction of the average width are stacked ([0, 0.5], default 0.05)
    pub column_tolerance: f32,
}

impl Default for ReadingOrderConfig {
    fn default() -> Self {
        Self {
            row_overlap_ratio: 0.5,
            row_top_tolerance: 0.25,
            column_tolerance: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: PanelFormat,
    /// JPEG quality, 1-100 (default 90). Ignored for PNG.
    pub jpeg_quality: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: PanelFormat::Png,
            jpeg_quality: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubprocessConfig {
    /// Worker executable. When unset, `panelcut` is looked up on `PATH`.
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: vec![
                "segment".to_string(),
                "--stdin".to_string(),
                "--backend".to_string(),
                "native".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub backend: BackendPreference,
    /// Per-request budget in milliseconds (default 30000)
    pub timeout_ms: u64,
    pub subprocess: SubprocessConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            timeout_ms: 30_000,
            subprocess: SubprocessConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub decoder: DecoderConfig,
    pub detector: DetectorConfig,
    pub filter: FilterConfig,
    pub reading_order: ReadingOrderConfig,
    pub output: OutputConfig,
    pub runtime: RuntimeConfig,
}

impl SegmentationConfig {
    pub fn builder() -> SegmentationConfigBuilder {
        SegmentationConfigBuilder::default()
    }

    /// Defaults, overlaid with an optional JSON file and then the process environment.
    /// Without a file, a whole config passed in `PANELCUT_CONFIG_JSON` is the base.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_json_file(path)?,
            None => match std::env::var("PANELCUT_CONFIG_JSON") {
                Ok(json) if !json.trim().is_empty() => Self::from_json_str(&json)?,
                _ => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SegmentError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            SegmentError::InvalidConfig(format!("cannot parse {}: {}", path.display(), e))
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| SegmentError::InvalidConfig(format!("cannot parse config JSON: {}", e)))
    }

    /// Apply `PANELCUT_*` overrides. `lookup` is `std::env::var` in production.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PANELCUT_GUTTER") {
            self.detector.gutter = v.parse()?;
        }
        if let Some(v) = lookup("PANELCUT_THRESHOLD") {
            self.detector.threshold = v.parse()?;
        }
        if let Some(v) = lookup("PANELCUT_MIN_AREA_FRACTION") {
            self.detector.min_area_fraction = parse_number("PANELCUT_MIN_AREA_FRACTION", &v)?;
        }
        if let Some(v) = lookup("PANELCUT_DEDUP_IOU") {
            self.filter.dedup_iou_threshold = parse_number("PANELCUT_DEDUP_IOU", &v)?;
        }
        if let Some(v) = lookup("PANELCUT_ROW_OVERLAP") {
            self.reading_order.row_overlap_ratio = parse_number("PANELCUT_ROW_OVERLAP", &v)?;
        }
        if let Some(v) = lookup("PANELCUT_OUTPUT_FORMAT") {
            self.output.format = v.parse()?;
        }
        if let Some(v) = lookup("PANELCUT_TIMEOUT_MS") {
            self.runtime.timeout_ms = parse_number("PANELCUT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("PANELCUT_BACKEND") {
            self.runtime.backend = v.parse()?;
        }
        if let Some(v) = lookup("PANELCUT_WORKER") {
            if !v.trim().is_empty() {
                self.runtime.subprocess.program = Some(PathBuf::from(v.trim()));
            }
        }
        Ok(())
    }

    /// Reject values outside their documented ranges
    pub fn validate(&self) -> Result<()> {
        let d = &self.detector;
        check_range("detector.min_area_fraction", d.min_area_fraction, 0.0, 0.5, false)?;
        check_range("detector.max_area_fraction", d.max_area_fraction, d.min_area_fraction, 1.0, false)?;
        check_range("detector.blur_sigma", d.blur_sigma, 0.0, 10.0, true)?;
        if d.gap_closing_radius > 16 {
            return Err(invalid("detector.gap_closing_radius", "must be at most 16"));
        }
        check_range("detector.min_aspect_ratio", d.min_aspect_ratio, 0.0, 1.0, false)?;
        check_range("detector.max_aspect_ratio", d.max_aspect_ratio, 1.0, 100.0, true)?;
        if d.min_panel_width == 0 || d.min_panel_height == 0 {
            return Err(invalid("detector.min_panel_width/height", "must be positive"));
        }
        match d.threshold {
            ThresholdMethod::Fixed { level } if level == 0 || level == 255 => {
                return Err(invalid("detector.threshold.level", "must be within 1-254"));
            }
            ThresholdMethod::Adaptive { block_radius, offset } => {
                if block_radius == 0 || block_radius > 255 {
                    return Err(invalid("detector.threshold.block_radius", "must be within 1-255"));
                }
                if !(-64..=64).contains(&offset) {
                    return Err(invalid("detector.threshold.offset", "must be within -64..=64"));
                }
            }
            _ => {}
        }

        let f = &self.filter;
        check_range("filter.containment_tolerance", f.containment_tolerance, 0.0, 0.1, true)?;
        check_range("filter.dedup_iou_threshold", f.dedup_iou_threshold, 0.0, 1.0, false)?;

        let r = &self.reading_order;
        check_range("reading_order.row_overlap_ratio", r.row_overlap_ratio, 0.0, 1.0, false)?;
        check_range("reading_order.row_top_tolerance", r.row_top_tolerance, 0.0, 1.0, true)?;
        check_range("reading_order.column_tolerance", r.column_tolerance, 0.0, 0.5, true)?;

        if !(1..=100).contains(&self.output.jpeg_quality) {
            return Err(invalid("output.jpeg_quality", "must be within 1-100"));
        }
        if self.decoder.max_width == 0 || self.decoder.max_height == 0 || self.decoder.max_input_bytes == 0 {
            return Err(invalid("decoder limits", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> SegmentError {
    SegmentError::InvalidConfig(format!("{} {}", field, reason))
}

/// `include_low` makes the lower bound inclusive; the upper bound always is
fn check_range(field: &str, value: f32, low: f32, high: f32, include_low: bool) -> Result<()> {
    let above_low = if include_low { value >= low } else { value > low };
    if value.is_finite() && above_low && value <= high {
        Ok(())
    } else {
        let bracket = if include_low { '[' } else { '(' };
        Err(invalid(field, &format!("must be within {}{}, {}], got {}", bracket, low, high, value)))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SegmentError::InvalidConfig(format!("{} is not a valid number: '{}'", key, value)))
}

/// Builder for the commonly tuned knobs; everything else keeps its default
#[derive(Default)]
pub struct SegmentationConfigBuilder {
    gutter: Option<GutterTone>,
    threshold: Option<ThresholdMethod>,
    min_area_fraction: Option<f32>,
    fallback_full_page: Option<bool>,
    format: Option<PanelFormat>,
    timeout_ms: Option<u64>,
    backend: Option<BackendPreference>,
    worker: Option<PathBuf>,
}

impl SegmentationConfigBuilder {
    pub fn gutter(mut self, gutter: GutterTone) -> Self {
        self.gutter = Some(gutter);
        self
    }

    pub fn threshold(mut self, threshold: ThresholdMethod) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn min_area_fraction(mut self, fraction: f32) -> Self {
        self.min_area_fraction = Some(fraction);
        self
    }

    pub fn fallback_full_page(mut self, enabled: bool) -> Self {
        self.fallback_full_page = Some(enabled);
        self
    }

    pub fn format(mut self, format: PanelFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn backend(mut self, backend: BackendPreference) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn worker(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker = Some(program.into());
        self
    }

    pub fn build(self) -> SegmentationConfig {
        let mut config = SegmentationConfig::default();
        if let Some(gutter) = self.gutter {
            config.detector.gutter = gutter;
        }
        if let Some(threshold) = self.threshold {
            config.detector.threshold = threshold;
        }
        if let Some(fraction) = self.min_area_fraction {
            config.detector.min_area_fraction = fraction;
        }
        if let Some(enabled) = self.fallback_full_page {
            config.filter.fallback_full_page = enabled;
        }
        if let Some(format) = self.format {
            config.output.format = format;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.runtime.timeout_ms = timeout_ms;
        }
        if let Some(backend) = self.backend {
            config.runtime.backend = backend;
        }
        if self.worker.is_some() {
            config.runtime.subprocess.program = self.worker;
        }
        config
    }
}
