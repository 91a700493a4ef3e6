//! Image-processing backends the facade can run requests on.
//!
//! `native` runs the pipeline in this process; `subprocess` hands the page to
//! a worker executable speaking the JSON protocol of `panelcut segment --stdin`.

pub mod native;
pub mod subprocess;

use std::future::Future;

pub use native::NativeBackend;
pub use subprocess::SubprocessBackend;

use crate::error::Result;
use crate::models::SegmentationResult;

/// One page to segment
#[derive(Debug, Clone)]
pub struct SegmentRequest {
    /// Raw container bytes, base64 text or a data URI
    pub bytes: Vec<u8>,
    pub allow_data_uri: bool,
}

/// Capability interface every backend implements
pub trait SegmentationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap readiness check: `Err(Unavailable)` says why this backend can't run.
    /// Must not decode or process any image.
    fn probe(&self) -> Result<()>;

    fn segment(&self, request: SegmentRequest) -> impl Future<Output = Result<SegmentationResult>> + Send;
}

/// Runtime-selected backend
pub enum AnyBackend {
    Native(NativeBackend),
    Subprocess(SubprocessBackend),
}

impl SegmentationBackend for AnyBackend {
    fn name(&self) -> &'static str {
        match self {
            AnyBackend::Native(b) => b.name(),
            AnyBackend::Subprocess(b) => b.name(),
        }
    }

    fn probe(&self) -> Result<()> {
        match self {
            AnyBackend::Native(b) => b.probe(),
            AnyBackend::Subprocess(b) => b.probe(),
        }
    }

    async fn segment(&self, request: SegmentRequest) -> Result<SegmentationResult> {
        match self {
            AnyBackend::Native(b) => b.segment(request).await,
            AnyBackend::Subprocess(b) => b.segment(request).await,
        }
    }
}

impl From<NativeBackend> for AnyBackend {
    fn from(backend: NativeBackend) -> Self {
        AnyBackend::Native(backend)
    }
}

impl From<SubprocessBackend> for AnyBackend {
    fn from(backend: SubprocessBackend) -> Self {
        AnyBackend::Subprocess(backend)
    }
}
