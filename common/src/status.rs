use serde::{Deserialize, Serialize};

/// Outcome class of the most recently published run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    None,
    Success,
    Error,
}

/// The record served by the status query.
///
/// JSON shape:
///   {"status": "none" | "success" | "error", "video": string | null,
///    "frames": number, "time": number | null}
///
/// `time` is the run id, i.e. the Unix timestamp in seconds at which the run
/// was confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionStatus {
    pub status: StatusKind,
    pub video: Option<String>,
    pub frames: u32,
    pub time: Option<i64>,
}

impl DetectionStatus {
    /// The record returned before any run has completed.
    pub fn none() -> Self {
        Self {
            status: StatusKind::None,
            video: None,
            frames: 0,
            time: None,
        }
    }

    pub fn success(video: impl Into<String>, frames: u32, run_id: i64) -> Self {
        Self {
            status: StatusKind::Success,
            video: Some(video.into()),
            frames,
            time: Some(run_id),
        }
    }
}

impl Default for DetectionStatus {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_serializes_with_nulls() {
        let json = serde_json::to_value(DetectionStatus::none()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"status": "none", "video": null, "frames": 0, "time": null})
        );
    }

    #[test]
    fn success_record_shape() {
        let status = DetectionStatus::success("person_1708300000.mp4", 100, 1708300000);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "success",
                "video": "person_1708300000.mp4",
                "frames": 100,
                "time": 1708300000
            })
        );
    }
}
