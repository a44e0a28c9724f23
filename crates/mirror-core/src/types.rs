use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Raw detector output in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Padded, clamped face box in integer frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    /// Expand a detection by `padding_ratio * max(width, height)` on each side
    /// and clamp it to a `frame_width` × `frame_height` frame.
    ///
    /// Each edge is clamped on its own: padding cut off at the left or top
    /// is not added back on the right or bottom, so a face near the border
    /// gets a narrower crop than one in the middle of the frame.
    ///
    /// Returns `None` when the clamped region has no area.
    pub fn from_detection(
        bbox: &BoundingBox,
        frame_width: u32,
        frame_height: u32,
        padding_ratio: f32,
    ) -> Option<Self> {
        // Truncate toward zero, the same way the detector's pixel grid is indexed.
        let x = bbox.x as i64;
        let y = bbox.y as i64;
        let w = bbox.width as i64;
        let h = bbox.height as i64;
        if w <= 0 || h <= 0 {
            return None;
        }

        let pad = (padding_ratio.max(0.0) * w.max(h) as f32) as i64;
        let fw = frame_width as i64;
        let fh = frame_height as i64;

        let x0 = (x - pad).max(0);
        let y0 = (y - pad).max(0);
        let x1 = (x + w + pad).min(fw);
        let y1 = (y + h + pad).min(fh);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(Self {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// The fixed, ordered set of trained emotion categories.
///
/// Declaration order is the classifier's output order: index `i` of the
/// probability vector always maps to `EmotionLabel::ALL[i]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EmotionLabel {
    Angry,
    Contempt,
    Disgust,
    Fear,
    Happy,
    Neutral,
    Sad,
    Surprise,
}

impl EmotionLabel {
    pub const COUNT: usize = 8;

    pub const ALL: [EmotionLabel; Self::COUNT] = [
        EmotionLabel::Angry,
        EmotionLabel::Contempt,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Happy,
        EmotionLabel::Neutral,
        EmotionLabel::Sad,
        EmotionLabel::Surprise,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EmotionLabel::Angry => "Angry",
            EmotionLabel::Contempt => "Contempt",
            EmotionLabel::Disgust => "Disgust",
            EmotionLabel::Fear => "Fear",
            EmotionLabel::Happy => "Happy",
            EmotionLabel::Neutral => "Neutral",
            EmotionLabel::Sad => "Sad",
            EmotionLabel::Surprise => "Surprise",
        }
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown emotion label: {0:?}")]
pub struct UnknownEmotion(pub String);

impl FromStr for EmotionLabel {
    type Err = UnknownEmotion;

    /// Case-insensitive match against the label names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|label| label.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownEmotion(s.to_string()))
    }
}

/// Per-label probabilities, iterated in label order.
pub type Probabilities = BTreeMap<EmotionLabel, f32>;

/// Outcome of one `predict` call. Built fresh on every call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    /// Smoothed label; `None` is the "No Face" sentinel.
    #[serde(serialize_with = "serialize_emotion")]
    pub emotion: Option<EmotionLabel>,
    /// Smoothed confidence in [0, 1].
    pub confidence: f32,
    /// Unsmoothed probabilities from this frame only. Empty when no
    /// classification was produced.
    pub probabilities: Probabilities,
    pub bbox: Option<FaceRegion>,
    pub face_detected: bool,
}

impl PredictionResult {
    /// Display name of the no-face sentinel. Never a trained category.
    pub const NO_FACE: &'static str = "No Face";

    pub fn no_face() -> Self {
        Self {
            emotion: None,
            confidence: 0.0,
            probabilities: Probabilities::new(),
            bbox: None,
            face_detected: false,
        }
    }

    /// A face was found but no classification is available for it.
    pub fn neutral(region: FaceRegion) -> Self {
        Self {
            emotion: Some(EmotionLabel::Neutral),
            confidence: 0.0,
            probabilities: Probabilities::new(),
            bbox: Some(region),
            face_detected: true,
        }
    }

    pub fn emotion_name(&self) -> &'static str {
        self.emotion.map_or(Self::NO_FACE, EmotionLabel::as_str)
    }
}

impl fmt::Display for PredictionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.face_detected {
            return f.write_str("No face detected");
        }
        write!(f, "{}: {:.0}%", self.emotion_name(), self.confidence * 100.0)
    }
}

fn serialize_emotion<S: Serializer>(
    emotion: &Option<EmotionLabel>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(emotion.map_or(PredictionResult::NO_FACE, EmotionLabel::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9 }
    }

    #[test]
    fn test_region_padding_inside_frame() {
        // pad = 10% of max(50, 40) = 5
        let region = FaceRegion::from_detection(&bbox(100.0, 100.0, 50.0, 40.0), 640, 480, 0.1).unwrap();
        assert_eq!(region, FaceRegion { x: 95, y: 95, width: 60, height: 50 });
    }

    #[test]
    fn test_region_clamped_at_origin() {
        let region = FaceRegion::from_detection(&bbox(2.0, 3.0, 100.0, 100.0), 640, 480, 0.1).unwrap();
        assert_eq!(region.x, 0);
        assert_eq!(region.y, 0);
        // right edge: 2 + 100 + 10 = 112
        assert_eq!(region.width, 112);
        assert_eq!(region.height, 113);
    }

    #[test]
    fn test_region_border_padding_is_not_shifted() {
        let centered = FaceRegion::from_detection(&bbox(300.0, 200.0, 100.0, 100.0), 640, 480, 0.1).unwrap();
        let at_border = FaceRegion::from_detection(&bbox(2.0, 200.0, 100.0, 100.0), 640, 480, 0.1).unwrap();
        assert_eq!(centered.width, 120);
        // 8 of the 10 left-hand padding pixels fall outside the frame and are dropped.
        assert_eq!(at_border.width, 112);
        assert_eq!(at_border.x + at_border.width, 112);
    }

    #[test]
    fn test_region_clamped_at_far_edge() {
        let region = FaceRegion::from_detection(&bbox(600.0, 440.0, 60.0, 60.0), 640, 480, 0.1).unwrap();
        assert_eq!(region, FaceRegion { x: 594, y: 434, width: 46, height: 46 });
    }

    #[test]
    fn test_region_outside_frame_is_none() {
        assert!(FaceRegion::from_detection(&bbox(700.0, 10.0, 20.0, 20.0), 640, 480, 0.1).is_none());
        assert!(FaceRegion::from_detection(&bbox(-80.0, 10.0, 20.0, 20.0), 640, 480, 0.1).is_none());
    }

    #[test]
    fn test_region_degenerate_box_is_none() {
        assert!(FaceRegion::from_detection(&bbox(10.0, 10.0, 0.0, 20.0), 640, 480, 0.1).is_none());
        assert!(FaceRegion::from_detection(&bbox(10.0, 10.0, 20.0, -5.0), 640, 480, 0.1).is_none());
    }

    #[test]
    fn test_label_index_roundtrip_matches_order() {
        for (i, label) in EmotionLabel::ALL.iter().enumerate() {
            assert_eq!(label.index(), i);
            assert_eq!(EmotionLabel::from_index(i), Some(*label));
        }
        assert_eq!(EmotionLabel::from_index(8), None);
        assert_eq!(EmotionLabel::ALL[1], EmotionLabel::Contempt);
    }

    #[test]
    fn test_label_from_str_case_insensitive() {
        assert_eq!("happy".parse::<EmotionLabel>(), Ok(EmotionLabel::Happy));
        assert_eq!(" SURPRISE ".parse::<EmotionLabel>(), Ok(EmotionLabel::Surprise));
        assert!("No Face".parse::<EmotionLabel>().is_err());
    }

    #[test]
    fn test_no_face_sentinel() {
        let result = PredictionResult::no_face();
        assert_eq!(result.emotion_name(), "No Face");
        assert!(!result.face_detected);
        assert!(result.probabilities.is_empty());
        assert_eq!(result.to_string(), "No face detected");
    }

    #[test]
    fn test_result_serializes_sentinel_and_labels() {
        let json = serde_json::to_value(PredictionResult::no_face()).unwrap();
        assert_eq!(json["emotion"], "No Face");
        assert_eq!(json["bbox"], serde_json::Value::Null);

        let region = FaceRegion { x: 1, y: 2, width: 3, height: 4 };
        let mut result = PredictionResult::neutral(region);
        result.probabilities.insert(EmotionLabel::Happy, 0.5);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["emotion"], "Neutral");
        assert_eq!(json["bbox"]["width"], 3);
        assert_eq!(json["probabilities"]["Happy"], 0.5);
    }
}
