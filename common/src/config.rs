use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Parameters of one triggered recording run.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Sampling rate of the recording, also the frame rate of the output video.
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u32,
    /// Detector class id of interest. COCO class 0 is "person".
    #[serde(default = "default_target_class")]
    pub target_class: u32,
    #[serde(default = "default_video_dir")]
    pub video_dir: PathBuf,
    #[serde(default = "default_frames_dir")]
    pub frames_dir: PathBuf,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_box_thickness")]
    pub box_thickness: u32,
    /// Failed reads tolerated in a row while recording before the run is abandoned.
    #[serde(default = "default_max_consecutive_read_failures")]
    pub max_consecutive_read_failures: u32,
    /// Wall-clock bound on a whole run, probe through status publication.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_rtsp_transport")]
    pub rtsp_transport: String,
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncoderConfig {
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_crf")]
    pub crf: u32,
    #[serde(default = "default_preset")]
    pub preset: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Inference service endpoint receiving JPEG frames.
    #[serde(default = "default_detector_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_detector_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_alert_enabled")]
    pub enabled: bool,
    #[serde(default = "default_player")]
    pub player: String,
    #[serde(default = "default_sound_path")]
    pub sound_path: PathBuf,
    /// Upper bound on one alert; an overrunning player is killed.
    #[serde(default = "default_alert_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            duration_secs: default_duration_secs(),
            target_class: default_target_class(),
            video_dir: default_video_dir(),
            frames_dir: default_frames_dir(),
            jpeg_quality: default_jpeg_quality(),
            box_thickness: default_box_thickness(),
            max_consecutive_read_failures: default_max_consecutive_read_failures(),
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

impl CaptureConfig {
    /// Number of frames a run records: sampling rate times duration.
    pub fn target_frame_count(&self) -> u32 {
        self.fps.saturating_mul(self.duration_secs)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            rtsp_transport: default_rtsp_transport(),
            open_timeout_ms: default_open_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            codec: default_codec(),
            crf: default_crf(),
            preset: default_preset(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_detector_endpoint(),
            timeout_ms: default_detector_timeout_ms(),
            min_confidence: default_min_confidence(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: default_alert_enabled(),
            player: default_player(),
            sound_path: default_sound_path(),
            timeout_ms: default_alert_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.fps == 0 {
            return Err(ConfigError::Invalid("capture.fps must be greater than zero".into()));
        }
        if self.capture.duration_secs == 0 {
            return Err(ConfigError::Invalid(
                "capture.duration_secs must be greater than zero".into(),
            ));
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(ConfigError::Invalid("capture.jpeg_quality must be in 1..=100".into()));
        }
        if self.capture.run_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "capture.run_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_bind() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    9000
}
fn default_fps() -> u32 {
    10
}
fn default_duration_secs() -> u32 {
    10
}
fn default_target_class() -> u32 {
    0
}
/// Empty means the working directory; recorded paths are then bare file names.
fn default_video_dir() -> PathBuf {
    PathBuf::new()
}
fn default_frames_dir() -> PathBuf {
    PathBuf::from("frames")
}
fn default_jpeg_quality() -> u8 {
    90
}
fn default_box_thickness() -> u32 {
    2
}
fn default_max_consecutive_read_failures() -> u32 {
    50
}
fn default_run_timeout_secs() -> u64 {
    120
}
fn default_ffmpeg_path() -> String {
    "ffmpeg".into()
}
fn default_rtsp_transport() -> String {
    "tcp".into()
}
fn default_open_timeout_ms() -> u64 {
    10_000
}
fn default_read_timeout_ms() -> u64 {
    5_000
}
fn default_codec() -> String {
    "h264".into()
}
fn default_crf() -> u32 {
    23
}
fn default_preset() -> String {
    "veryfast".into()
}
fn default_detector_endpoint() -> String {
    "http://127.0.0.1:8000/infer".into()
}
fn default_detector_timeout_ms() -> u64 {
    5_000
}
fn default_min_confidence() -> f32 {
    0.25
}
fn default_alert_enabled() -> bool {
    true
}
fn default_player() -> String {
    "aplay".into()
}
fn default_sound_path() -> PathBuf {
    PathBuf::from("alert.wav")
}
fn default_alert_timeout_ms() -> u64 {
    10_000
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.capture.fps, 10);
        assert_eq!(config.capture.duration_secs, 10);
        assert_eq!(config.capture.target_frame_count(), 100);
        assert_eq!(config.capture.target_class, 0);
        assert_eq!(config.capture.frames_dir, PathBuf::from("frames"));
        assert_eq!(config.alert.player, "aplay");
        assert_eq!(config.alert.timeout_ms, 10_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [capture]
            fps = 5
            duration_secs = 4

            [detector]
            endpoint = "http://gpu-box:8000/infer"
            "#,
        )
        .unwrap();
        assert_eq!(config.capture.target_frame_count(), 20);
        assert_eq!(config.capture.max_consecutive_read_failures, 50);
        assert_eq!(config.detector.endpoint, "http://gpu-box:8000/infer");
        assert_eq!(config.detector.timeout_ms, 5_000);
    }

    #[test]
    fn zero_fps_rejected() {
        let err = Config::parse("[capture]\nfps = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_run_timeout_rejected() {
        let err = Config::parse("[capture]\nrun_timeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("run_timeout_secs"));
    }

    #[test]
    fn malformed_toml_rejected() {
        let err = Config::parse("[capture\nfps = 10").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Config::load(Path::new("/nonexistent/person-watch.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/person-watch.toml"));
    }
}
