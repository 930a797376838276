use std::path::{Path, PathBuf};

/// File name of a run's recorded video.
/// e.g. "person_1708300000.mp4"
pub fn video_file_name(run_id: i64) -> String {
    format!("person_{run_id}.mp4")
}

/// File name of one extracted frame, sequence zero-padded to four digits.
/// e.g. "frame_1708300000_0042.jpg"
pub fn frame_file_name(run_id: i64, seq: u32) -> String {
    format!("frame_{run_id}_{seq:04}.jpg")
}

pub fn video_path(dir: &Path, run_id: i64) -> PathBuf {
    dir.join(video_file_name(run_id))
}

pub fn frame_path(dir: &Path, run_id: i64, seq: u32) -> PathBuf {
    dir.join(frame_file_name(run_id, seq))
}
