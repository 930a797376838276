pub mod ffmpeg;
mod splitter;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::frame::Frame;
use crate::recorder::encoder::{EncoderError, VideoWriter};

pub use ffmpeg::FfmpegBackend;
pub use splitter::JpegSplitter;

/// An open video source owned by exactly one pipeline run.
///
/// A failed `read` does not invalidate the source; the caller decides whether
/// to retry. Dropping the source releases everything it holds, `close` does
/// the same eagerly and may be called more than once.
#[async_trait]
pub trait FrameSource: Send {
    async fn read(&mut self) -> Result<Frame, SourceError>;

    async fn close(&mut self);

    /// Human-readable name for logging (credentials redacted).
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// The media services a capture run consumes: live decoding, decoding of a
/// recorded file, and encoding.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn open_stream(&self, url: &str) -> Result<Box<dyn FrameSource>, SourceError>;

    async fn open_file(&self, path: &Path) -> Result<Box<dyn FrameSource>, SourceError>;

    async fn create_writer(
        &self,
        path: &Path,
        fps: u32,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn VideoWriter>, EncoderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("stream unavailable: {0}")]
    Unavailable(String),
    #[error("no frame within {0:?}")]
    Timeout(Duration),
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("end of stream")]
    EndOfStream,
    #[error("stream read failed: {0}")]
    Io(String),
}

/// Replace the userinfo part of a URL with `***`.
///
/// Camera URLs routinely carry `user:password@`, and passwords may themselves
/// contain `@`, so everything before the last `@` is treated as userinfo.
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest_start = scheme_end + 3;
    let rest = &url[rest_start..];
    match rest.rfind('@') {
        Some(at) => format!("{}***@{}", &url[..rest_start], &rest[at + 1..]),
        None => url.to_string(),
    }
}
