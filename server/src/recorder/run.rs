use std::path::{Path, PathBuf};

use serde::Serialize;

use super::keys;

/// Where a pipeline run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Probing,
    Confirmed,
    Recording,
    Extracting,
    Done,
    NoPerson,
    Failed,
}

/// Live view of a run, published on its watch channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunProgress {
    pub phase: RunPhase,
    pub run_id: Option<i64>,
    pub frames_captured: u32,
    pub frames_extracted: u32,
    pub target_frames: u32,
}

impl RunProgress {
    pub fn probing(target_frames: u32) -> Self {
        Self {
            phase: RunPhase::Probing,
            run_id: None,
            frames_captured: 0,
            frames_extracted: 0,
            target_frames,
        }
    }
}

/// One triggered recording, from confirmed detection to status publication.
///
/// `frames_captured` only ever grows and never passes `target_frame_count`.
#[derive(Debug)]
pub struct CaptureRun {
    run_id: i64,
    target_frame_count: u32,
    frames_captured: u32,
    video_path: PathBuf,
    frame_dir: PathBuf,
}

impl CaptureRun {
    pub fn new(run_id: i64, target_frame_count: u32, video_dir: &Path, frame_dir: &Path) -> Self {
        Self {
            run_id,
            target_frame_count,
            frames_captured: 0,
            video_path: keys::video_path(video_dir, run_id),
            frame_dir: frame_dir.to_path_buf(),
        }
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn target_frame_count(&self) -> u32 {
        self.target_frame_count
    }

    pub fn frames_captured(&self) -> u32 {
        self.frames_captured
    }

    pub fn video_path(&self) -> &Path {
        &self.video_path
    }

    pub fn frame_path(&self, seq: u32) -> PathBuf {
        keys::frame_path(&self.frame_dir, self.run_id, seq)
    }

    pub fn frame_dir(&self) -> &Path {
        &self.frame_dir
    }

    pub fn is_complete(&self) -> bool {
        self.frames_captured >= self.target_frame_count
    }

    pub fn record_frame(&mut self) {
        debug_assert!(!self.is_complete());
        self.frames_captured += 1;
    }
}
