use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, error, info, warn};

use crate::frame::Frame;

/// Sink for the frames of one recording, in presentation order.
#[async_trait]
pub trait VideoWriter: Send {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), EncoderError>;

    /// Flush and close the output. Returns the number of frames written.
    /// Calling it again after a successful finish is an error.
    async fn finish(&mut self) -> Result<u32, EncoderError>;

    fn frame_count(&self) -> u32;
}

#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(String),
    #[error("failed to encode frame: {0}")]
    Encode(String),
    #[error("failed to write frame to ffmpeg stdin: {0}")]
    Write(String),
    #[error("failed to wait for ffmpeg: {0}")]
    Wait(String),
    #[error("ffmpeg exited with non-zero status: {0}")]
    FfmpegFailed(String),
    #[error("writer already finished")]
    Finished,
}

/// Encoding parameters handed to ffmpeg.
#[derive(Debug, Clone)]
pub struct EncodeSettings {
    pub ffmpeg_path: String,
    pub codec: String,
    pub crf: u32,
    pub preset: String,
    /// Quality of the intermediate JPEGs piped into ffmpeg.
    pub jpeg_quality: u8,
}

/// MP4 writer backed by an ffmpeg subprocess reading MJPEG frames on stdin.
pub struct FfmpegVideoWriter {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    output_path: PathBuf,
    width: u32,
    height: u32,
    jpeg_quality: u8,
    frame_count: u32,
}

impl FfmpegVideoWriter {
    /// Spawn ffmpeg writing `output_path` at `fps`, for frames of `width`x`height`.
    pub async fn start(
        settings: &EncodeSettings,
        output_path: &Path,
        fps: u32,
        width: u32,
        height: u32,
    ) -> Result<Self, EncoderError> {
        let vcodec = match settings.codec.as_str() {
            "h265" => "libx265",
            _ => "libx264",
        };

        let fps_str = fps.to_string();
        let crf_str = settings.crf.to_string();
        let output = output_path
            .to_str()
            .ok_or_else(|| EncoderError::Spawn("output path is not valid UTF-8".into()))?;

        let mut cmd = Command::new(&settings.ffmpeg_path);
        cmd.args([
            "-hide_banner",
            "-loglevel", "error",
            "-f", "image2pipe",
            "-vcodec", "mjpeg",
            "-r", &fps_str,
            "-i", "pipe:0",
            "-c:v", vcodec,
            "-preset", &settings.preset,
            "-crf", &crf_str,
            // yuv420p needs even dimensions
            "-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2",
            "-pix_fmt", "yuv420p",
            "-movflags", "+faststart",
            "-y",
            output,
        ])
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| EncoderError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncoderError::Spawn("could not get stdin handle".into()))?;

        debug!(
            codec = vcodec,
            crf = settings.crf,
            preset = settings.preset,
            fps,
            width,
            height,
            output = output_path.display().to_string(),
            "ffmpeg encoder started"
        );

        Ok(Self {
            child: Some(child),
            stdin: Some(stdin),
            output_path: output_path.to_path_buf(),
            width,
            height,
            jpeg_quality: settings.jpeg_quality,
            frame_count: 0,
        })
    }
}

#[async_trait]
impl VideoWriter for FfmpegVideoWriter {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), EncoderError> {
        let stdin = self.stdin.as_mut().ok_or(EncoderError::Finished)?;

        // Every frame must match the resolution the writer was opened for.
        let encoded = if frame.width() != self.width || frame.height() != self.height {
            debug!(
                got_width = frame.width(),
                got_height = frame.height(),
                width = self.width,
                height = self.height,
                "resizing frame to output resolution"
            );
            let resized =
                imageops::resize(frame.image(), self.width, self.height, FilterType::Triangle);
            Frame::new(resized).to_jpeg(self.jpeg_quality)
        } else {
            frame.to_jpeg(self.jpeg_quality)
        };
        let jpeg = encoded.map_err(|e| EncoderError::Encode(e.to_string()))?;

        stdin
            .write_all(&jpeg)
            .await
            .map_err(|e| EncoderError::Write(e.to_string()))?;
        self.frame_count += 1;
        debug!(frame_count = self.frame_count, "pushed frame to encoder");
        Ok(())
    }

    async fn finish(&mut self) -> Result<u32, EncoderError> {
        // Close stdin so ffmpeg knows there are no more frames.
        drop(self.stdin.take());
        let child = self.child.take().ok_or(EncoderError::Finished)?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| EncoderError::Wait(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(stderr = %stderr, "ffmpeg exited with error");
            return Err(EncoderError::FfmpegFailed(stderr.into_owned()));
        }

        info!(
            frame_count = self.frame_count,
            output = self.output_path.display().to_string(),
            "video encoding complete"
        );
        Ok(self.frame_count)
    }

    fn frame_count(&self) -> u32 {
        self.frame_count
    }
}

/// Check whether ffmpeg is available. Logs a warning if not found.
pub async fn check_ffmpeg_available(ffmpeg_path: &str) {
    match Command::new(ffmpeg_path).arg("-version").output().await {
        Ok(out) if out.status.success() => {
            debug!("ffmpeg is available");
        }
        Ok(_) => {
            warn!("ffmpeg returned non-zero for -version; capture may fail");
        }
        Err(e) => {
            warn!(
                error = %e,
                ffmpeg_path,
                "ffmpeg not found; stream decoding and video encoding will fail. \
                 Install ffmpeg with libx264 support."
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_ffmpeg_is_a_spawn_error() {
        let settings = EncodeSettings {
            ffmpeg_path: "/nonexistent/ffmpeg".into(),
            codec: "h264".into(),
            crf: 23,
            preset: "veryfast".into(),
            jpeg_quality: 90,
        };
        let dir = tempfile::tempdir().unwrap();
        let result =
            FfmpegVideoWriter::start(&settings, &dir.path().join("out.mp4"), 10, 64, 48).await;
        assert!(matches!(result, Err(EncoderError::Spawn(_))));
    }
}
