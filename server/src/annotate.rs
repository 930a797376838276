use image::Rgb;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::frame::{BoundingBox, Detection, Frame};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Return a copy of `frame` with a box burned in for every detection.
///
/// Boxes are clamped to the image; with no detections the copy is unchanged.
pub fn annotate(frame: &Frame, detections: &[Detection], thickness: u32) -> Frame {
    let mut image = frame.image().clone();
    let (width, height) = image.dimensions();

    for detection in detections {
        let Some((x1, y1, x2, y2)) = clamp_box(&detection.bbox, width, height) else {
            continue;
        };
        for t in 0..thickness.max(1) {
            let (left, top) = (x1 + t, y1 + t);
            let (right, bottom) = (x2.saturating_sub(t), y2.saturating_sub(t));
            if left > right || top > bottom {
                break;
            }
            let rect = Rect::at(left as i32, top as i32)
                .of_size(right - left + 1, bottom - top + 1);
            draw_hollow_rect_mut(&mut image, rect, BOX_COLOR);
        }
    }

    Frame::new(image)
}

/// Clamp a float box to inclusive pixel bounds, or `None` if it is degenerate
/// or entirely outside the image.
fn clamp_box(bbox: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    let values = [bbox.x1, bbox.y1, bbox.x2, bbox.y2];
    if values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let (lo_x, hi_x) = (bbox.x1.min(bbox.x2), bbox.x1.max(bbox.x2));
    let (lo_y, hi_y) = (bbox.y1.min(bbox.y2), bbox.y1.max(bbox.y2));
    if hi_x < 0.0 || hi_y < 0.0 || lo_x > (width - 1) as f32 || lo_y > (height - 1) as f32 {
        return None;
    }
    let clamp = |v: f32, max: u32| v.max(0.0).min((max - 1) as f32) as u32;
    Some((
        clamp(lo_x, width),
        clamp(lo_y, height),
        clamp(hi_x, width),
        clamp(hi_y, height),
    ))
}
