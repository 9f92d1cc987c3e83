use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::detection::BoundingBox;

/// Per-frame metadata as delivered by the inference stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMeta {
    pub frame_number: u64,
    #[serde(default)]
    pub objects: Vec<ObjectMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub class_id: u32,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect: Option<Rect>,
}

/// Rectangle in the vendor's float pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl FrameMeta {
    pub fn from_json_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).context("frame metadata must be a JSON object")
    }
}

impl From<Rect> for BoundingBox {
    fn from(rect: Rect) -> Self {
        BoundingBox {
            left: to_pixels(rect.left),
            top: to_pixels(rect.top),
            width: to_pixels(rect.width),
            height: to_pixels(rect.height),
        }
    }
}

fn to_pixels(v: f32) -> u32 {
    if v.is_nan() || v <= 0.0 {
        return 0;
    }
    // `as` saturates at u32::MAX.
    v.round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frame_with_and_without_rects() -> Result<()> {
        let frame = FrameMeta::from_json_line(
            r#"{"frame_number":7,"objects":[
                {"class_id":0,"confidence":0.91,"rect":{"left":10.4,"top":5.6,"width":100.0,"height":50.5}},
                {"class_id":2,"confidence":0.5}
            ]}"#,
        )?;
        assert_eq!(frame.frame_number, 7);
        assert_eq!(frame.objects.len(), 2);
        assert!(frame.objects[1].rect.is_none());

        let bbox = BoundingBox::from(frame.objects[0].rect.expect("rect"));
        assert_eq!(
            bbox,
            BoundingBox {
                left: 10,
                top: 6,
                width: 100,
                height: 51
            }
        );
        Ok(())
    }

    #[test]
    fn missing_objects_means_empty_frame() -> Result<()> {
        let frame = FrameMeta::from_json_line(r#"{"frame_number":3}"#)?;
        assert!(frame.objects.is_empty());
        Ok(())
    }

    #[test]
    fn negative_rect_values_clamp_to_zero() {
        let bbox = BoundingBox::from(Rect {
            left: -4.0,
            top: f32::NAN,
            width: 12.2,
            height: 0.0,
        });
        assert_eq!(bbox.left, 0);
        assert_eq!(bbox.top, 0);
        assert_eq!(bbox.width, 12);
        assert_eq!(bbox.height, 0);
    }

    #[test]
    fn rejects_non_object_lines() {
        assert!(FrameMeta::from_json_line("not json").is_err());
        assert!(FrameMeta::from_json_line(r#"{"objects":[]}"#).is_err());
    }
}
