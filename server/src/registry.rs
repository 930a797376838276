use std::sync::RwLock;

use person_watch_common::status::DetectionStatus;
use tracing::info;

/// Single-slot store of the most recent published run outcome.
///
/// `publish` replaces the whole record under the write lock, so a reader sees
/// either the previous record or the new one, never a mix.
pub struct JobRegistry {
    slot: RwLock<DetectionStatus>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(DetectionStatus::none()),
        }
    }

    pub fn publish(&self, status: DetectionStatus) {
        info!(
            status = ?status.status,
            video = status.video.as_deref().unwrap_or(""),
            frames = status.frames,
            time = status.time.unwrap_or_default(),
            "publishing detection status"
        );
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = status;
    }

    pub fn read(&self) -> DetectionStatus {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use person_watch_common::status::StatusKind;
    use std::sync::Arc;

    #[test]
    fn starts_with_sentinel() {
        assert_eq!(JobRegistry::new().read(), DetectionStatus::none());
    }

    #[test]
    fn last_publish_wins() {
        let registry = JobRegistry::new();
        registry.publish(DetectionStatus::success("person_1.mp4", 100, 1));
        registry.publish(DetectionStatus::success("person_2.mp4", 90, 2));
        let status = registry.read();
        assert_eq!(status.status, StatusKind::Success);
        assert_eq!(status.video.as_deref(), Some("person_2.mp4"));
        assert_eq!(status.frames, 90);
        assert_eq!(status.time, Some(2));
    }

    #[test]
    fn readers_never_see_mixed_records() {
        let registry = Arc::new(JobRegistry::new());
        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for i in 1..=2_000i64 {
                    registry.publish(DetectionStatus::success(
                        format!("person_{i}.mp4"),
                        i as u32,
                        i,
                    ));
                }
            })
        };
        for _ in 0..2_000 {
            let status = registry.read();
            if let Some(time) = status.time {
                assert_eq!(status.video, Some(format!("person_{time}.mp4")));
                assert_eq!(status.frames as i64, time);
            } else {
                assert_eq!(status, DetectionStatus::none());
            }
        }
        writer.join().unwrap();
    }
}
