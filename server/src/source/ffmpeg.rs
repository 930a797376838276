//! ffmpeg-backed media: decoding live streams and recorded files into frames,
//! and encoding recordings.
//!
//! Decoding runs `ffmpeg ... -f image2pipe -vcodec mjpeg pipe:1` and splits the
//! concatenated JPEGs on stdout. The subprocess is killed when the source is
//! closed or dropped.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use person_watch_common::config::{EncoderConfig, StreamConfig};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{redact_url, FrameSource, JpegSplitter, MediaBackend, SourceError};
use crate::frame::Frame;
use crate::recorder::encoder::{EncodeSettings, EncoderError, FfmpegVideoWriter, VideoWriter};

const READ_CHUNK: usize = 64 * 1024;

/// Production media backend.
pub struct FfmpegBackend {
    stream: StreamConfig,
    encode: EncodeSettings,
    /// Rate live streams are resampled to.
    sample_fps: u32,
}

impl FfmpegBackend {
    pub fn new(
        stream: StreamConfig,
        encoder: &EncoderConfig,
        sample_fps: u32,
        jpeg_quality: u8,
    ) -> Self {
        let encode = EncodeSettings {
            ffmpeg_path: stream.ffmpeg_path.clone(),
            codec: encoder.codec.clone(),
            crf: encoder.crf,
            preset: encoder.preset.clone(),
            jpeg_quality,
        };
        Self {
            stream,
            encode,
            sample_fps,
        }
    }

    fn stream_args(&self, url: &str) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-nostdin".into(),
        ];
        if url.starts_with("rtsp://") || url.starts_with("rtsps://") {
            args.extend(["-rtsp_transport".into(), self.stream.rtsp_transport.clone()]);
        }
        args.extend([
            "-i".into(),
            url.to_string(),
            "-an".into(),
            "-r".into(),
            self.sample_fps.to_string(),
        ]);
        args.extend(mjpeg_output_args());
        args
    }

    fn file_args(path: &str) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-nostdin".into(),
            "-i".into(),
            path.to_string(),
            "-an".into(),
            // One output image per stored frame, no duplication or dropping.
            "-fps_mode".into(),
            "passthrough".into(),
        ];
        args.extend(mjpeg_output_args());
        args
    }
}

fn mjpeg_output_args() -> [String; 7] {
    [
        "-f".into(),
        "image2pipe".into(),
        "-vcodec".into(),
        "mjpeg".into(),
        "-q:v".into(),
        "2".into(),
        "pipe:1".into(),
    ]
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    async fn open_stream(&self, url: &str) -> Result<Box<dyn FrameSource>, SourceError> {
        let source = FfmpegSource::open(
            &self.stream.ffmpeg_path,
            self.stream_args(url),
            redact_url(url),
            Duration::from_millis(self.stream.open_timeout_ms),
            Duration::from_millis(self.stream.read_timeout_ms),
        )
        .await?;
        Ok(Box::new(source))
    }

    async fn open_file(&self, path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| SourceError::Unavailable("path is not valid UTF-8".into()))?;
        let source = FfmpegSource::open(
            &self.stream.ffmpeg_path,
            Self::file_args(path_str),
            path_str.to_string(),
            Duration::from_millis(self.stream.open_timeout_ms),
            Duration::from_millis(self.stream.read_timeout_ms),
        )
        .await?;
        Ok(Box::new(source))
    }

    async fn create_writer(
        &self,
        path: &Path,
        fps: u32,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn VideoWriter>, EncoderError> {
        let writer = FfmpegVideoWriter::start(&self.encode, path, fps, width, height).await?;
        Ok(Box::new(writer))
    }
}

/// One decoding ffmpeg subprocess.
pub struct FfmpegSource {
    label: String,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    splitter: JpegSplitter,
    read_timeout: Duration,
    eof: bool,
    frames_read: u64,
}

impl FfmpegSource {
    /// Spawn ffmpeg and wait (up to `open_timeout`) for it to either produce
    /// output or exit.
    ///
    /// An exit without any output and with a failure status means the input
    /// could not be opened. A silent but running process is handed back as
    /// an open source; its reads will time out.
    async fn open(
        ffmpeg_path: &str,
        args: Vec<String>,
        label: String,
        open_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, SourceError> {
        let mut child = Command::new(ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SourceError::Unavailable(format!("failed to spawn ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::Unavailable("could not get stdout handle".into()))?;
        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text).await;
                text
            })
        });

        let mut source = Self {
            label,
            child: Some(child),
            stdout: Some(stdout),
            stderr,
            splitter: JpegSplitter::new(),
            read_timeout,
            eof: false,
            frames_read: 0,
        };

        let deadline = Instant::now() + open_timeout;
        match source.fill(deadline).await {
            Ok(()) => {}
            Err(SourceError::Timeout(_)) => {
                warn!(source = source.label, "no output from ffmpeg yet, treating stream as open");
            }
            Err(e) => return Err(e),
        }

        if source.eof && source.splitter.buffered() == 0 {
            let status = match source.child.as_mut() {
                Some(child) => tokio::time::timeout(open_timeout, child.wait())
                    .await
                    .ok()
                    .and_then(Result::ok),
                None => None,
            };
            if !status.is_some_and(|s| s.success()) {
                let stderr = source.take_stderr().await;
                return Err(SourceError::Unavailable(format!(
                    "ffmpeg could not open {}: {}",
                    source.label,
                    stderr.trim()
                )));
            }
        }

        info!(source = source.label, "stream opened");
        Ok(source)
    }

    /// Read one chunk of stdout into the splitter, or note EOF.
    async fn fill(&mut self, deadline: Instant) -> Result<(), SourceError> {
        let Some(stdout) = self.stdout.as_mut() else {
            self.eof = true;
            return Ok(());
        };
        let mut chunk = vec![0u8; READ_CHUNK];
        match tokio::time::timeout_at(deadline, stdout.read(&mut chunk)).await {
            Ok(Ok(0)) => {
                self.eof = true;
                Ok(())
            }
            Ok(Ok(n)) => {
                self.splitter.push(&chunk[..n]);
                Ok(())
            }
            Ok(Err(e)) => Err(SourceError::Io(e.to_string())),
            Err(_) => Err(SourceError::Timeout(self.read_timeout)),
        }
    }

    async fn take_stderr(&mut self) -> String {
        match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    async fn read(&mut self) -> Result<Frame, SourceError> {
        let deadline = Instant::now() + self.read_timeout;
        loop {
            if let Some(jpeg) = self.splitter.next_image() {
                self.frames_read += 1;
                return Frame::from_jpeg(&jpeg).map_err(|e| SourceError::Decode(e.to_string()));
            }
            if self.eof {
                return Err(SourceError::EndOfStream);
            }
            self.fill(deadline).await?;
        }
    }

    async fn close(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!(source = self.label, error = %e, "ffmpeg already exited");
            }
        }
        if let Some(handle) = self.stderr.take() {
            handle.abort();
        }
        debug!(source = self.label, frames = self.frames_read, "stream closed");
    }

    fn name(&self) -> &str {
        &self.label
    }
}
