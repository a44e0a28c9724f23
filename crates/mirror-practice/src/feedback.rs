//! Turn predictions into practice feedback for a target emotion.

use mirror_core::{EmotionLabel, PredictionResult};
use std::fmt;

/// Smoothed confidence a matching label must exceed to count as success.
pub const SUCCESS_THRESHOLD: f32 = 0.4;

/// What the player is told after a prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Feedback {
    NoFace,
    /// The target was shown with enough confidence.
    Success { target: EmotionLabel },
    /// A face was seen showing something else, or too weakly.
    Detected { emotion: EmotionLabel, confidence: f32 },
}

impl Feedback {
    /// Grade one prediction against `target`. Success requires a strict
    /// `confidence > threshold`.
    pub fn evaluate(result: &PredictionResult, target: EmotionLabel, threshold: f32) -> Self {
        let (true, Some(emotion)) = (result.face_detected, result.emotion) else {
            return Self::NoFace;
        };
        if emotion == target && result.confidence > threshold {
            Self::Success { target }
        } else {
            Self::Detected {
                emotion,
                confidence: result.confidence,
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFace => f.write_str("No face detected"),
            Self::Success { target } => write!(f, "Perfect! You showed {target}!"),
            Self::Detected { emotion, .. } => write!(f, "Detected: {emotion}"),
        }
    }
}

/// Feedback for one prediction plus whether it completed the round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub feedback: Feedback,
    /// True only for the first success since the target was set.
    pub first_success: bool,
}

/// One practice round: a target emotion and whether it has been shown yet.
#[derive(Debug, Clone)]
pub struct PracticeSession {
    target: EmotionLabel,
    threshold: f32,
    succeeded: bool,
    observed: u64,
}

impl PracticeSession {
    pub fn new(target: EmotionLabel, threshold: f32) -> Self {
        Self {
            target,
            threshold,
            succeeded: false,
            observed: 0,
        }
    }

    pub fn target(&self) -> EmotionLabel {
        self.target
    }

    /// Start a new round. Success can be celebrated again.
    pub fn set_target(&mut self, target: EmotionLabel) {
        self.target = target;
        self.succeeded = false;
        self.observed = 0;
    }

    pub fn observe(&mut self, result: &PredictionResult) -> Observation {
        self.observed += 1;
        let feedback = Feedback::evaluate(result, self.target, self.threshold);
        let first_success = feedback.is_success() && !self.succeeded;
        if first_success {
            self.succeeded = true;
        }
        Observation {
            feedback,
            first_success,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.succeeded
    }

    /// Predictions observed this round.
    pub fn observed(&self) -> u64 {
        self.observed
    }
}
