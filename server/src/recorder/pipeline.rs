use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use person_watch_common::config::CaptureConfig;
use person_watch_common::status::DetectionStatus;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::encoder::{EncoderError, VideoWriter};
use super::run::{CaptureRun, RunPhase, RunProgress};
use crate::alert::Notifier;
use crate::annotate::annotate;
use crate::detector::{DetectError, Detector};
use crate::frame::{retain_class, Detection, Frame};
use crate::registry::JobRegistry;
use crate::source::{redact_url, FrameSource, MediaBackend, SourceError};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("could not open stream: {0}")]
    StreamUnavailable(#[source] SourceError),
    #[error("stream produced no probe frame: {0}")]
    NoFrames(#[source] SourceError),
    #[error("gave up after {failures} consecutive failed reads ({captured}/{target} frames captured)")]
    ReadRetriesExhausted {
        failures: u32,
        captured: u32,
        target: u32,
    },
    #[error("run did not finish within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Detection(#[from] DetectError),
    #[error("recording failed: {0}")]
    Encoding(#[from] EncoderError),
    #[error("could not read back recorded video: {0}")]
    ReadBack(#[source] SourceError),
    #[error("failed to encode extracted frame: {0}")]
    Image(#[from] image::ImageError),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSummary {
    pub run_id: i64,
    pub video_path: PathBuf,
    pub frames_recorded: u32,
    pub frames_extracted: u32,
}

/// How a run ended. Only `Done` touches the job registry.
#[derive(Debug)]
pub enum RunOutcome {
    NoPerson,
    Done(CaptureSummary),
    Failed(CaptureError),
}

impl RunOutcome {
    pub fn phase(&self) -> RunPhase {
        match self {
            RunOutcome::NoPerson => RunPhase::NoPerson,
            RunOutcome::Done(_) => RunPhase::Done,
            RunOutcome::Failed(_) => RunPhase::Failed,
        }
    }
}

const DEFAULT_ALERT_TIMEOUT: Duration = Duration::from_secs(10);

/// Probe, record, extract, alert, publish.
///
/// One instance is shared by every run; per-run state lives in `CaptureRun`
/// and the progress channel handed to [`CapturePipeline::run`].
pub struct CapturePipeline {
    config: CaptureConfig,
    alert_timeout: Duration,
    media: Arc<dyn MediaBackend>,
    detector: Arc<dyn Detector>,
    notifier: Arc<dyn Notifier>,
    registry: Arc<JobRegistry>,
}

impl CapturePipeline {
    pub fn new(
        config: CaptureConfig,
        media: Arc<dyn MediaBackend>,
        detector: Arc<dyn Detector>,
        notifier: Arc<dyn Notifier>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            config,
            alert_timeout: DEFAULT_ALERT_TIMEOUT,
            media,
            detector,
            notifier,
            registry,
        }
    }

    /// Bound on the alert. An alert that overruns it is dropped and the run
    /// still publishes.
    pub fn with_alert_timeout(mut self, timeout: Duration) -> Self {
        self.alert_timeout = timeout;
        self
    }

    pub fn target_frame_count(&self) -> u32 {
        self.config.target_frame_count()
    }

    /// Run the whole pipeline against `url`. Capture work (probe, record,
    /// extract) is bounded by the configured run timeout; the alert has its
    /// own bound. The terminal phase is always sent on `progress` before
    /// returning.
    pub async fn run(&self, url: &str, progress: &watch::Sender<RunProgress>) -> RunOutcome {
        let deadline = Instant::now() + self.run_timeout();
        let outcome = match self.execute(url, deadline, progress).await {
            Ok(Some(summary)) => RunOutcome::Done(summary),
            Ok(None) => RunOutcome::NoPerson,
            Err(e) => RunOutcome::Failed(e),
        };
        let phase = outcome.phase();
        progress.send_modify(|p| p.phase = phase);
        outcome
    }

    async fn execute(
        &self,
        url: &str,
        deadline: Instant,
        progress: &watch::Sender<RunProgress>,
    ) -> Result<Option<CaptureSummary>, CaptureError> {
        info!(source = redact_url(url), "PROBING: opening stream");
        let mut stream = self
            .within(deadline, self.media.open_stream(url))
            .await?
            .map_err(CaptureError::StreamUnavailable)?;

        let recorded = self.probe_and_record(stream.as_mut(), deadline, progress).await;
        stream.close().await;
        drop(stream);

        let Some((run, frames_recorded)) = recorded? else {
            return Ok(None);
        };

        let frames_extracted = match self.extract(&run, deadline, progress).await {
            Ok(count) => count,
            Err(e) => {
                discard_frames(&run).await;
                discard_partial(run.video_path()).await;
                return Err(e);
            }
        };

        self.alert(run.run_id()).await;

        self.registry.publish(DetectionStatus::success(
            run.video_path().display().to_string(),
            frames_extracted,
            run.run_id(),
        ));

        Ok(Some(CaptureSummary {
            run_id: run.run_id(),
            video_path: run.video_path().to_path_buf(),
            frames_recorded,
            frames_extracted,
        }))
    }

    /// Probe one frame and, if it shows a person, record the annotated clip.
    /// Returns `None` when the probe shows nobody.
    async fn probe_and_record(
        &self,
        stream: &mut dyn FrameSource,
        deadline: Instant,
        progress: &watch::Sender<RunProgress>,
    ) -> Result<Option<(CaptureRun, u32)>, CaptureError> {
        let probe = self
            .within(deadline, stream.read())
            .await?
            .map_err(CaptureError::NoFrames)?;
        let people = self.within(deadline, self.people_in(&probe)).await??;
        if people.is_empty() {
            info!(source = stream.name(), "PROBING: no person in probe frame");
            return Ok(None);
        }

        let run_id = chrono::Utc::now().timestamp();
        let mut run = CaptureRun::new(
            run_id,
            self.config.target_frame_count(),
            &self.config.video_dir,
            &self.config.frames_dir,
        );
        info!(
            run_id,
            people = people.len(),
            confidence = people.iter().map(|d| d.confidence).fold(0.0f32, f32::max),
            target_frames = run.target_frame_count(),
            video = run.video_path().display().to_string(),
            "CONFIRMED: person in probe frame, recording"
        );
        progress.send_modify(|p| {
            p.phase = RunPhase::Confirmed;
            p.run_id = Some(run_id);
        });

        create_dir(&self.config.video_dir).await?;
        let mut writer = self
            .within(
                deadline,
                self.media.create_writer(
                    run.video_path(),
                    self.config.fps,
                    probe.width(),
                    probe.height(),
                ),
            )
            .await??;
        progress.send_modify(|p| p.phase = RunPhase::Recording);

        let recorded = self
            .within(deadline, self.record(stream, writer.as_mut(), &mut run, progress))
            .await
            .and_then(|recorded| recorded);
        if let Err(e) = &recorded {
            warn!(
                run_id,
                written = writer.frame_count(),
                error = %e,
                "RECORDING: aborted, discarding partial video"
            );
        }
        let finished = writer.finish().await.map_err(CaptureError::from);
        match recorded.and(finished) {
            Ok(frames) => {
                info!(run_id, frames, "RECORDING: video finalized");
                Ok(Some((run, frames)))
            }
            Err(e) => {
                discard_partial(run.video_path()).await;
                Err(e)
            }
        }
    }

    async fn record(
        &self,
        stream: &mut dyn FrameSource,
        writer: &mut dyn VideoWriter,
        run: &mut CaptureRun,
        progress: &watch::Sender<RunProgress>,
    ) -> Result<(), CaptureError> {
        let budget = self.config.max_consecutive_read_failures;
        let mut consecutive_failures = 0u32;

        while !run.is_complete() {
            let frame = match stream.read().await {
                Ok(frame) => {
                    consecutive_failures = 0;
                    frame
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures > budget {
                        warn!(
                            run_id = run.run_id(),
                            error = %e,
                            captured = run.frames_captured(),
                            "RECORDING: read retry budget exhausted"
                        );
                        return Err(CaptureError::ReadRetriesExhausted {
                            failures: consecutive_failures,
                            captured: run.frames_captured(),
                            target: run.target_frame_count(),
                        });
                    }
                    debug!(error = %e, consecutive_failures, "RECORDING: read failed, retrying");
                    continue;
                }
            };

            let people = self.people_in(&frame).await?;
            writer
                .write_frame(&annotate(&frame, &people, self.config.box_thickness))
                .await?;
            run.record_frame();

            let captured = run.frames_captured();
            progress.send_modify(|p| p.frames_captured = captured);
        }
        Ok(())
    }

    /// Decode the recorded video back into numbered JPEGs, annotating each.
    async fn extract(
        &self,
        run: &CaptureRun,
        deadline: Instant,
        progress: &watch::Sender<RunProgress>,
    ) -> Result<u32, CaptureError> {
        progress.send_modify(|p| p.phase = RunPhase::Extracting);
        create_dir(run.frame_dir()).await?;

        let mut video = self
            .within(deadline, self.media.open_file(run.video_path()))
            .await?
            .map_err(CaptureError::ReadBack)?;
        let extracted = self
            .within(deadline, self.extract_frames(video.as_mut(), run, progress))
            .await
            .and_then(|extracted| extracted);
        video.close().await;

        let count = extracted?;
        info!(
            run_id = run.run_id(),
            frames = count,
            dir = run.frame_dir().display().to_string(),
            "EXTRACTING: frames written"
        );
        Ok(count)
    }

    async fn extract_frames(
        &self,
        video: &mut dyn FrameSource,
        run: &CaptureRun,
        progress: &watch::Sender<RunProgress>,
    ) -> Result<u32, CaptureError> {
        let mut count = 0u32;
        loop {
            let frame = match video.read().await {
                Ok(frame) => frame,
                Err(SourceError::EndOfStream) => break,
                Err(e) => {
                    warn!(run_id = run.run_id(), error = %e, extracted = count, "EXTRACTING: read failed, stopping");
                    break;
                }
            };

            let people = self.people_in(&frame).await?;
            let jpeg = annotate(&frame, &people, self.config.box_thickness)
                .to_jpeg(self.config.jpeg_quality)?;
            let path = run.frame_path(count);
            if let Err(source) = tokio::fs::write(&path, jpeg).await {
                return Err(CaptureError::Io { path, source });
            }

            count += 1;
            progress.send_modify(|p| p.frames_extracted = count);
        }
        Ok(count)
    }

    /// Best effort: failures and overruns are logged, never fatal.
    async fn alert(&self, run_id: i64) {
        match tokio::time::timeout(self.alert_timeout, self.notifier.notify()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(run_id, error = %e, "alert failed, continuing"),
            Err(_) => warn!(
                run_id,
                timeout_ms = self.alert_timeout.as_millis() as u64,
                "alert timed out, continuing"
            ),
        }
    }

    fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.config.run_timeout_secs)
    }

    /// Await `work` unless the run deadline passes first.
    async fn within<T>(
        &self,
        deadline: Instant,
        work: impl Future<Output = T>,
    ) -> Result<T, CaptureError> {
        tokio::time::timeout_at(deadline, work)
            .await
            .map_err(|_| CaptureError::Timeout(self.run_timeout()))
    }

    async fn people_in(&self, frame: &Frame) -> Result<Vec<Detection>, CaptureError> {
        let detections = self.detector.detect(frame).await?;
        Ok(retain_class(detections, self.config.target_class))
    }
}

async fn create_dir(dir: &Path) -> Result<(), CaptureError> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| CaptureError::Io {
            path: dir.to_path_buf(),
            source,
        })
}

/// Remove the JPEGs a failed extraction already wrote. Sequence numbers are
/// dense, so the first missing file ends the sweep.
async fn discard_frames(run: &CaptureRun) {
    let mut removed = 0u32;
    loop {
        let path = run.frame_path(removed);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
            Err(e) => {
                warn!(path = path.display().to_string(), error = %e, "failed to remove extracted frame");
                break;
            }
        }
    }
    if removed > 0 {
        info!(run_id = run.run_id(), frames = removed, "removed partially extracted frames");
    }
}

async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!(path = path.display().to_string(), "removed partial video"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = path.display().to_string(), error = %e, "failed to remove partial video"),
    }
}
