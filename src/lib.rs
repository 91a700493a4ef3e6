pub mod backend;
pub mod config;
pub mod decode;
pub mod detection;
pub mod error;
pub mod logger;
pub mod models;
pub mod pipeline;
pub mod segmenter;

pub use backend::{AnyBackend, NativeBackend, SegmentRequest, SegmentationBackend, SubprocessBackend};
pub use config::{
    BackendPreference, GutterTone, PanelFormat, SegmentationConfig, SegmentationConfigBuilder, ThresholdMethod,
};
pub use error::{ErrorKind, ErrorReport, Result, SegmentError};
pub use models::{ImageDimensions, Panel, PanelPlacement, SegmentationResult};
pub use pipeline::{
    Pipeline, PipelineData, PipelineStep, PipelineContext,
    BoundingBox, MetadataValue, DebugConfig
};
pub use segmenter::{RunOptions, Segmenter, segment_page, segment_page_with};
