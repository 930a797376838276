//! In-memory doubles for the media, detector and notifier seams.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use person_watch_common::config::CaptureConfig;
use tempfile::TempDir;

use crate::alert::{AlertError, Notifier};
use crate::detector::{DetectError, Detector};
use crate::frame::{BoundingBox, Detection, Frame};
use crate::recorder::encoder::{EncoderError, VideoWriter};
use crate::recorder::CapturePipeline;
use crate::registry::JobRegistry;
use crate::source::{FrameSource, MediaBackend, SourceError};

pub const PERSON_MARK: Rgb<u8> = Rgb([255, 0, 0]);
const SIZE: u32 = 16;

/// A frame the detector double reports a person in. `tag` is stamped in the
/// bottom-right pixel so frame order can be checked after recording.
pub fn person_frame(tag: u8) -> Frame {
    let mut image = RgbImage::new(SIZE, SIZE);
    image.put_pixel(0, 0, PERSON_MARK);
    image.put_pixel(SIZE - 1, SIZE - 1, Rgb([tag, tag, tag]));
    Frame::new(image)
}

pub fn empty_frame(tag: u8) -> Frame {
    let mut image = RgbImage::new(SIZE, SIZE);
    image.put_pixel(SIZE - 1, SIZE - 1, Rgb([tag, tag, tag]));
    Frame::new(image)
}

pub fn tag_of(frame: &Frame) -> u8 {
    frame.image().get_pixel(SIZE - 1, SIZE - 1).0[0]
}

pub fn read_failure() -> Result<Frame, SourceError> {
    Err(SourceError::Timeout(Duration::from_millis(1)))
}

/// Scripted behaviour of the next stream the media double hands out.
pub enum StreamScript {
    Unavailable,
    /// Replays the reads, then reports end of stream.
    Reads(Vec<Result<Frame, SourceError>>),
    /// Replays the reads, then blocks forever.
    Hanging(Vec<Result<Frame, SourceError>>),
}

struct ScriptedStream {
    reads: VecDeque<Result<Frame, SourceError>>,
    hang_when_empty: bool,
    released: Arc<AtomicUsize>,
    closed: bool,
}

#[async_trait]
impl FrameSource for ScriptedStream {
    async fn read(&mut self) -> Result<Frame, SourceError> {
        match self.reads.pop_front() {
            Some(read) => read,
            None if self.hang_when_empty => std::future::pending().await,
            None => Err(SourceError::EndOfStream),
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        if !self.closed {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Keeps frames in memory. An empty placeholder file stands in for the video
/// on disk so cleanup of failed runs can be observed.
struct MemoryWriter {
    path: PathBuf,
    frames: Vec<Frame>,
    recordings: Arc<Mutex<HashMap<PathBuf, Vec<Frame>>>>,
    finished: bool,
}

#[async_trait]
impl VideoWriter for MemoryWriter {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), EncoderError> {
        if self.finished {
            return Err(EncoderError::Finished);
        }
        self.frames.push(frame.clone());
        Ok(())
    }

    async fn finish(&mut self) -> Result<u32, EncoderError> {
        if self.finished {
            return Err(EncoderError::Finished);
        }
        self.finished = true;
        let frames = std::mem::take(&mut self.frames);
        let count = frames.len() as u32;
        self.recordings.lock().unwrap().insert(self.path.clone(), frames);
        Ok(count)
    }

    fn frame_count(&self) -> u32 {
        self.frames.len() as u32
    }
}

/// Media double: scripted live streams, recordings kept in memory and
/// replayed by `open_file`.
#[derive(Default)]
pub struct MemoryMedia {
    streams: Mutex<VecDeque<StreamScript>>,
    recordings: Arc<Mutex<HashMap<PathBuf, Vec<Frame>>>>,
    opened: AtomicUsize,
    released: Arc<AtomicUsize>,
    writers: AtomicUsize,
    stall_playback: AtomicBool,
}

impl MemoryMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_stream(&self, script: StreamScript) {
        self.streams.lock().unwrap().push_back(script);
    }

    pub fn recording(&self, path: &Path) -> Option<Vec<Frame>> {
        self.recordings.lock().unwrap().get(path).cloned()
    }

    pub fn recording_count(&self) -> usize {
        self.recordings.lock().unwrap().len()
    }

    /// Sources (streams and recorded files) handed out so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Sources closed or dropped so far.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn writers_created(&self) -> usize {
        self.writers.load(Ordering::SeqCst)
    }

    /// Recorded files replay their frames and then block instead of ending.
    pub fn stall_playback(&self) {
        self.stall_playback.store(true, Ordering::SeqCst);
    }

    fn source(&self, reads: Vec<Result<Frame, SourceError>>, hang: bool) -> Box<dyn FrameSource> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedStream {
            reads: reads.into(),
            hang_when_empty: hang,
            released: Arc::clone(&self.released),
            closed: false,
        })
    }
}

#[async_trait]
impl MediaBackend for MemoryMedia {
    async fn open_stream(&self, _url: &str) -> Result<Box<dyn FrameSource>, SourceError> {
        let script = self.streams.lock().unwrap().pop_front();
        match script {
            Some(StreamScript::Reads(reads)) => Ok(self.source(reads, false)),
            Some(StreamScript::Hanging(reads)) => Ok(self.source(reads, true)),
            Some(StreamScript::Unavailable) | None => {
                Err(SourceError::Unavailable("connection refused".into()))
            }
        }
    }

    async fn open_file(&self, path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
        let frames = self
            .recording(path)
            .ok_or_else(|| SourceError::Unavailable(format!("{} not found", path.display())))?;
        let stall = self.stall_playback.load(Ordering::SeqCst);
        Ok(self.source(frames.into_iter().map(Ok).collect(), stall))
    }

    async fn create_writer(
        &self,
        path: &Path,
        _fps: u32,
        _width: u32,
        _height: u32,
    ) -> Result<Box<dyn VideoWriter>, EncoderError> {
        self.writers.fetch_add(1, Ordering::SeqCst);
        std::fs::write(path, b"").unwrap();
        Ok(Box::new(MemoryWriter {
            path: path.to_path_buf(),
            frames: Vec::new(),
            recordings: Arc::clone(&self.recordings),
            finished: false,
        }))
    }
}

/// Reports a person (class 0) when the top-left pixel carries
/// `PERSON_MARK`, and always a car (class 2).
#[derive(Default)]
pub struct MarkDetector {
    calls: AtomicUsize,
    fail_after: Option<usize>,
}

impl MarkDetector {
    pub fn failing_after(calls: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_after: Some(calls),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for MarkDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| call >= limit) {
            return Err(DetectError::Status(500));
        }
        let mut detections = vec![Detection {
            class_id: 2,
            bbox: BoundingBox::new(1.0, 1.0, 3.0, 3.0),
            confidence: 0.7,
        }];
        if *frame.image().get_pixel(0, 0) == PERSON_MARK {
            detections.push(Detection {
                class_id: 0,
                bbox: BoundingBox::new(4.0, 4.0, 12.0, 12.0),
                confidence: 0.9,
            });
        }
        Ok(detections)
    }
}

#[derive(Default, Clone, Copy)]
enum AlertScript {
    #[default]
    Succeed,
    Fail,
    Hang,
}

#[derive(Default)]
pub struct CountingNotifier {
    calls: AtomicUsize,
    script: AlertScript,
}

impl CountingNotifier {
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            script: AlertScript::Fail,
        }
    }

    /// Never completes, like a player stuck on a busy sound device.
    pub fn hanging() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            script: AlertScript::Hang,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify(&self) -> Result<(), AlertError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            AlertScript::Succeed => Ok(()),
            AlertScript::Fail => Err(AlertError::PlayerFailed {
                status: "exit status: 1".into(),
                stderr: "no sound card".into(),
            }),
            AlertScript::Hang => std::future::pending().await,
        }
    }
}

pub const ALERT_TIMEOUT: Duration = Duration::from_millis(200);

/// A pipeline wired to the doubles, writing videos and frames under a temp dir.
pub struct Harness {
    pub pipeline: Arc<CapturePipeline>,
    pub media: Arc<MemoryMedia>,
    pub detector: Arc<MarkDetector>,
    pub notifier: Arc<CountingNotifier>,
    pub registry: Arc<JobRegistry>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(fps: u32, duration_secs: u32) -> Self {
        Self::with(fps, duration_secs, MarkDetector::default(), CountingNotifier::default())
    }

    pub fn with(
        fps: u32,
        duration_secs: u32,
        detector: MarkDetector,
        notifier: CountingNotifier,
    ) -> Self {
        Self::with_run_timeout(fps, duration_secs, detector, notifier, 30)
    }

    pub fn with_run_timeout(
        fps: u32,
        duration_secs: u32,
        detector: MarkDetector,
        notifier: CountingNotifier,
        run_timeout_secs: u64,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig {
            fps,
            duration_secs,
            video_dir: dir.path().join("videos"),
            frames_dir: dir.path().join("frames"),
            max_consecutive_read_failures: 5,
            run_timeout_secs,
            ..CaptureConfig::default()
        };
        let media = Arc::new(MemoryMedia::new());
        let detector = Arc::new(detector);
        let notifier = Arc::new(notifier);
        let registry = Arc::new(JobRegistry::new());
        let pipeline = Arc::new(
            CapturePipeline::new(
                config,
                Arc::clone(&media) as Arc<dyn MediaBackend>,
                Arc::clone(&detector) as Arc<dyn Detector>,
                Arc::clone(&notifier) as Arc<dyn Notifier>,
                Arc::clone(&registry),
            )
            .with_alert_timeout(ALERT_TIMEOUT),
        );
        Self {
            pipeline,
            media,
            detector,
            notifier,
            registry,
            dir,
        }
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.dir.path().join("frames")
    }

    pub fn video_dir(&self) -> PathBuf {
        self.dir.path().join("videos")
    }

    /// Files left in the video directory, sorted by name.
    pub fn videos_on_disk(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.video_dir()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}
