//! Detection results as returned by the inference service.

use serde::{Deserialize, Serialize};

use crate::category::TrashCategory;

/// Width and height of the frame the detector reports boxes in.
pub const DEFAULT_REFERENCE_SIZE: u32 = 640;

/// Axis-aligned box in reference-frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(into = "[f32; 4]")]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Build a box with non-negative extents. A negative extent is flipped
    /// around its origin so the box covers the same area.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        let (x, width) = if width < 0.0 { (x + width, -width) } else { (x, width) };
        let (y, height) = if height < 0.0 { (y + height, -height) } else { (y, height) };
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1.min(x2), y1.min(y2), (x2 - x1).abs(), (y2 - y1).abs())
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from([x, y, width, height]: [f32; 4]) -> Self {
        Self::new(x, y, width, height)
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

/// Pixel dimensions of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn square(side: u32) -> Self {
        Self::new(side, side)
    }
}

impl Default for FrameSize {
    fn default() -> Self {
        Self::square(DEFAULT_REFERENCE_SIZE)
    }
}

/// One model output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireDetection")]
pub struct Detection {
    #[serde(rename = "trashType")]
    pub category: TrashCategory,
    /// Always within [0, 1].
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

impl Detection {
    pub fn new(category: TrashCategory, confidence: f32, bbox: Option<BoundingBox>) -> Self {
        Self {
            category,
            confidence: clamp_confidence(confidence),
            bbox,
        }
    }

    /// Confidence as a whole percentage, for display.
    pub fn percent(&self) -> u32 {
        (self.confidence * 100.0).round() as u32
    }
}

fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// The service sends the category either as a name or as a class index.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireLabel {
    Index(u64),
    Name(String),
}

#[derive(Deserialize)]
struct WireDetection {
    #[serde(rename = "trashType")]
    trash_type: WireLabel,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    bbox: Option<[f32; 4]>,
}

impl From<WireDetection> for Detection {
    fn from(wire: WireDetection) -> Self {
        let category = match wire.trash_type {
            WireLabel::Index(index) => TrashCategory::from_class_index(index),
            WireLabel::Name(name) => TrashCategory::parse(&name),
        };
        let bbox = wire.bbox.map(BoundingBox::from).filter(BoundingBox::is_finite);
        Detection::new(category, wire.confidence, bbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_and_indexed_categories() {
        let json = r#"[
            {"trashType": "Plastic", "confidence": 0.91, "bbox": [10, 20, 30, 40]},
            {"trashType": 1, "confidence": 0.5}
        ]"#;
        let detections: Vec<Detection> = serde_json::from_str(json).unwrap();
        assert_eq!(detections[0].category, TrashCategory::Plastic);
        assert_eq!(
            detections[0].bbox,
            Some(BoundingBox::new(10.0, 20.0, 30.0, 40.0))
        );
        assert_eq!(detections[1].category, TrashCategory::Glass);
        assert_eq!(detections[1].bbox, None);
    }

    #[test]
    fn confidence_is_clamped() {
        let json = r#"[{"trashType": "food", "confidence": 1.7}, {"trashType": "food", "confidence": -0.2}]"#;
        let detections: Vec<Detection> = serde_json::from_str(json).unwrap();
        assert_eq!(detections[0].confidence, 1.0);
        assert_eq!(detections[1].confidence, 0.0);
        assert_eq!(Detection::new(TrashCategory::Food, f32::NAN, None).confidence, 0.0);
    }

    #[test]
    fn negative_extents_are_flipped() {
        let b = BoundingBox::new(100.0, 50.0, -40.0, -10.0);
        assert_eq!(b, BoundingBox::new(60.0, 40.0, 40.0, 10.0));
        assert!(b.width >= 0.0 && b.height >= 0.0);
    }

    #[test]
    fn serializes_in_wire_shape() {
        let detection = Detection::new(
            TrashCategory::Metal,
            0.25,
            Some(BoundingBox::new(1.0, 2.0, 3.0, 4.0)),
        );
        let value = serde_json::to_value(&detection).unwrap();
        assert_eq!(value["trashType"], "Metal");
        assert_eq!(value["bbox"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));
    }
}
