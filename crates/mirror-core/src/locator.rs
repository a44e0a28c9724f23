//! Single-subject face location: pick the most confident detection and turn
//! it into a padded, clamped [`FaceRegion`].

use crate::detector::DetectorError;
use crate::types::{BoundingBox, FaceRegion};

/// Detections below this confidence are ignored.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
/// Padding applied on each side, as a fraction of the larger box edge.
pub const DEFAULT_PADDING_RATIO: f32 = 0.1;

/// A face detector over packed RGB frames.
pub trait FaceLocator: Send {
    /// Detect faces, most confident first.
    fn detect(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// True when `rgb` is a non-empty packed `width` × `height` RGB buffer.
pub fn is_valid_frame(rgb: &[u8], width: u32, height: u32) -> bool {
    width > 0 && height > 0 && rgb.len() == width as usize * height as usize * 3
}

/// Wraps a [`FaceLocator`] with the single-subject selection policy.
pub struct Locator {
    detector: Box<dyn FaceLocator>,
    min_confidence: f32,
    padding_ratio: f32,
}

impl Locator {
    pub fn new(detector: Box<dyn FaceLocator>, min_confidence: f32, padding_ratio: f32) -> Self {
        Self {
            detector,
            min_confidence,
            padding_ratio,
        }
    }

    /// Locate the most confident face in the frame.
    ///
    /// Invalid frames, detector failures and detections below the confidence
    /// threshold all yield `None`; the next tick is the retry.
    pub fn locate(&mut self, rgb: &[u8], width: u32, height: u32) -> Option<FaceRegion> {
        if !is_valid_frame(rgb, width, height) {
            tracing::debug!(width, height, len = rgb.len(), "ignoring invalid frame");
            return None;
        }

        let detections = match self.detector.detect(rgb, width, height) {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed");
                return None;
            }
        };

        let best = select_best(&detections, self.min_confidence)?;
        let region = FaceRegion::from_detection(best, width, height, self.padding_ratio);
        tracing::debug!(confidence = best.confidence, ?region, faces = detections.len(), "face located");
        region
    }
}

/// Most confident detection clearing `min_confidence`; the earlier one wins ties.
fn select_best(detections: &[BoundingBox], min_confidence: f32) -> Option<&BoundingBox> {
    detections
        .iter()
        .filter(|d| d.confidence >= min_confidence)
        .fold(None, |best: Option<&BoundingBox>, d| match best {
            Some(b) if b.confidence >= d.confidence => Some(b),
            _ => Some(d),
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Returns the same detections for every frame.
    pub(crate) struct FixedLocator(pub Vec<BoundingBox>);

    impl FaceLocator for FixedLocator {
        fn detect(&mut self, _rgb: &[u8], _width: u32, _height: u32) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    struct FailingLocator;

    impl FaceLocator for FailingLocator {
        fn detect(&mut self, _rgb: &[u8], _width: u32, _height: u32) -> Result<Vec<BoundingBox>, DetectorError> {
            Err(DetectorError::InferenceFailed("boom".into()))
        }
    }

    pub(crate) fn face(x: f32, y: f32, size: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y, width: size, height: size, confidence }
    }

    fn locator(detections: Vec<BoundingBox>) -> Locator {
        Locator::new(Box::new(FixedLocator(detections)), DEFAULT_MIN_CONFIDENCE, DEFAULT_PADDING_RATIO)
    }

    #[test]
    fn test_frame_validation() {
        assert!(is_valid_frame(&[0u8; 12], 2, 2));
        assert!(!is_valid_frame(&[0u8; 11], 2, 2));
        assert!(!is_valid_frame(&[], 0, 0));
        assert!(!is_valid_frame(&[0u8; 12], 0, 4));
    }

    #[test]
    fn test_locate_picks_most_confident() {
        let frame = vec![0u8; 100 * 100 * 3];
        let mut loc = locator(vec![face(0.0, 0.0, 20.0, 0.6), face(50.0, 50.0, 20.0, 0.95)]);
        let region = loc.locate(&frame, 100, 100).unwrap();
        assert_eq!(region, FaceRegion { x: 48, y: 48, width: 24, height: 24 });
    }

    #[test]
    fn test_locate_ignores_low_confidence() {
        let frame = vec![0u8; 100 * 100 * 3];
        let mut loc = locator(vec![face(10.0, 10.0, 20.0, 0.49)]);
        assert!(loc.locate(&frame, 100, 100).is_none());
    }

    #[test]
    fn test_locate_threshold_is_inclusive() {
        let frame = vec![0u8; 100 * 100 * 3];
        let mut loc = locator(vec![face(10.0, 10.0, 20.0, 0.5)]);
        assert!(loc.locate(&frame, 100, 100).is_some());
    }

    #[test]
    fn test_locate_invalid_frame_is_none() {
        let mut loc = locator(vec![face(10.0, 10.0, 20.0, 0.9)]);
        assert!(loc.locate(&[], 0, 0).is_none());
        assert!(loc.locate(&[0u8; 10], 100, 100).is_none());
    }

    #[test]
    fn test_locate_detector_error_is_none() {
        let frame = vec![0u8; 10 * 10 * 3];
        let mut loc = Locator::new(Box::new(FailingLocator), DEFAULT_MIN_CONFIDENCE, DEFAULT_PADDING_RATIO);
        assert!(loc.locate(&frame, 10, 10).is_none());
    }

    #[test]
    fn test_locate_is_repeatable() {
        let frame = vec![7u8; 64 * 48 * 3];
        let mut loc = locator(vec![face(12.5, 8.2, 30.0, 0.8)]);
        let first = loc.locate(&frame, 64, 48);
        let second = loc.locate(&frame, 64, 48);
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn test_select_best_tie_keeps_first() {
        let dets = vec![face(1.0, 0.0, 5.0, 0.8), face(2.0, 0.0, 5.0, 0.8)];
        assert_eq!(select_best(&dets, 0.5).map(|d| d.x), Some(1.0));
    }
}
