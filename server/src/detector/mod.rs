pub mod http;

use async_trait::async_trait;

use crate::frame::{Detection, Frame};

pub use http::HttpDetector;

/// Object detector interface.
///
/// Implementations receive a decoded frame and return every object they
/// found; class filtering is the caller's job.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("failed to encode frame for inference: {0}")]
    Encode(String),
    #[error("invalid inference endpoint: {0}")]
    Endpoint(String),
    #[error("inference request failed: {0}")]
    Request(String),
    #[error("inference service returned HTTP {0}")]
    Status(u16),
    #[error("malformed inference response: {0}")]
    Body(String),
}
