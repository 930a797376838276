use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageReader, RgbImage};

/// A decoded video frame (RGB, 8 bits per channel).
///
/// Frames are consumed by the detector and the writers in the same pipeline
/// iteration that produced them and are not retained afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    /// Decode a JPEG (or any format the `image` crate recognises) into a frame.
    pub fn from_jpeg(data: &[u8]) -> Result<Self, image::ImageError> {
        let image = ImageReader::new(Cursor::new(data))
            .with_guessed_format()?
            .decode()?
            .to_rgb8();
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Encode the frame as a baseline JPEG at the given quality (1..=100).
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, image::ImageError> {
        let mut buf = Vec::with_capacity((self.width() * self.height()) as usize / 4);
        let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
        self.image.write_with_encoder(encoder)?;
        Ok(buf)
    }
}

/// Axis-aligned box in pixel coordinates, top-left `(x1, y1)` to bottom-right `(x2, y2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

/// One detector hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Keep only the detections of `class_id`.
pub fn retain_class(detections: Vec<Detection>, class_id: u32) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| d.class_id == class_id)
        .collect()
}
