use std::time::Duration;

use async_trait::async_trait;
use person_watch_common::config::DetectorConfig;
use serde::Deserialize;
use tracing::debug;

use super::{DetectError, Detector};
use crate::frame::{BoundingBox, Detection, Frame};

const UPLOAD_JPEG_QUALITY: u8 = 90;

/// Client for an HTTP inference service.
///
/// Each frame is POSTed as `image/jpeg` to the endpoint with `conf=<min>`
/// added to its query;
/// the service answers
/// `{"detections": [{"class_id": 0, "bbox": [x1, y1, x2, y2], "confidence": 0.87}]}`
/// with boxes in pixel coordinates of the uploaded image.
pub struct HttpDetector {
    client: reqwest::Client,
    endpoint: String,
    url: reqwest::Url,
}

#[derive(Debug, Deserialize)]
struct InferResponse {
    #[serde(default)]
    detections: Vec<WireDetection>,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    class_id: u32,
    bbox: [f32; 4],
    confidence: f32,
}

impl HttpDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self, DetectError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| DetectError::Request(e.to_string()))?;
        let mut url = reqwest::Url::parse(&config.endpoint)
            .map_err(|e| DetectError::Endpoint(format!("{}: {e}", config.endpoint)))?;
        url.query_pairs_mut()
            .append_pair("conf", &config.min_confidence.to_string());
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            url,
        })
    }
}

impl InferResponse {
    fn into_detections(self) -> Vec<Detection> {
        self.detections
            .into_iter()
            .map(|d| Detection {
                class_id: d.class_id,
                bbox: BoundingBox::new(d.bbox[0], d.bbox[1], d.bbox[2], d.bbox[3]),
                confidence: d.confidence,
            })
            .collect()
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        let jpeg = frame
            .to_jpeg(UPLOAD_JPEG_QUALITY)
            .map_err(|e| DetectError::Encode(e.to_string()))?;

        let response = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(jpeg)
            .send()
            .await
            .map_err(|e| DetectError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DetectError::Status(response.status().as_u16()));
        }

        let body: InferResponse = response.json().await.map_err(|e| {
            if e.is_decode() {
                DetectError::Body(e.to_string())
            } else {
                DetectError::Request(e.to_string())
            }
        })?;
        let detections = body.into_detections();
        debug!(count = detections.len(), "inference complete");
        Ok(detections)
    }

    fn name(&self) -> &str {
        &self.endpoint
    }
}
