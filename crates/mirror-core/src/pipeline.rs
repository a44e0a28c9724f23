//! Per-tick emotion prediction: locate → preprocess → classify → smooth.

use crate::classifier::{BackendKind, ClassifierError, EmotionClassifier};
use crate::detector::{DetectorError, FaceDetector};
use crate::locator::{FaceLocator, Locator, DEFAULT_MIN_CONFIDENCE, DEFAULT_PADDING_RATIO};
use crate::preprocess::{self, InputSpec};
use crate::smoother::{SmoothingWindow, DEFAULT_WINDOW_SIZE};
use crate::types::{FaceRegion, PredictionResult};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "scrfd_500m_bnkps.onnx";
pub const QUANTIZED_MODEL_FILE: &str = "mini_xception_int8.onnx";
pub const FULL_PRECISION_MODEL_FILE: &str = "mini_xception.onnx";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("face detector: {0}")]
    Detector(#[from] DetectorError),
}

/// Pipeline construction parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub detector_model: PathBuf,
    /// Preferred classifier export.
    pub quantized_model: PathBuf,
    /// Used only when the quantized export is absent or unloadable.
    pub full_precision_model: PathBuf,
    /// Smoothing window capacity.
    pub window_size: usize,
    pub min_face_confidence: f32,
    pub padding_ratio: f32,
    /// Clear the smoothing window after this many consecutive no-face
    /// frames. `None` keeps the window for the pipeline's whole lifetime.
    pub reset_after_missed_frames: Option<u32>,
}

impl PipelineConfig {
    /// Default settings with every model file looked up in `model_dir`.
    pub fn from_model_dir(model_dir: impl AsRef<Path>) -> Self {
        let dir = model_dir.as_ref();
        Self {
            detector_model: dir.join(DETECTOR_MODEL_FILE),
            quantized_model: dir.join(QUANTIZED_MODEL_FILE),
            full_precision_model: dir.join(FULL_PRECISION_MODEL_FILE),
            window_size: DEFAULT_WINDOW_SIZE,
            min_face_confidence: DEFAULT_MIN_CONFIDENCE,
            padding_ratio: DEFAULT_PADDING_RATIO,
            reset_after_missed_frames: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_model_dir(crate::default_model_dir())
    }
}

/// The emotion inference pipeline. Owns its detector, classifier and
/// smoothing window; not shared between threads.
pub struct EmotionPipeline {
    locator: Locator,
    classifier: EmotionClassifier,
    window: SmoothingWindow,
    reset_after_missed_frames: Option<u32>,
    missed_frames: u32,
}

impl EmotionPipeline {
    /// Load the detector and classifier named by `config`.
    ///
    /// A missing detector is fatal. Missing classifier models are not: the
    /// pipeline still locates faces and reports them as Neutral.
    pub fn load(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let detector = FaceDetector::load(&config.detector_model)?;
        let classifier = EmotionClassifier::load(&config.quantized_model, &config.full_precision_model);
        Ok(Self::from_parts(Box::new(detector), classifier, config))
    }

    /// Assemble a pipeline from an arbitrary detector and classifier. Model
    /// paths in `config` are ignored.
    pub fn from_parts(detector: Box<dyn FaceLocator>, classifier: EmotionClassifier, config: &PipelineConfig) -> Self {
        Self {
            locator: Locator::new(detector, config.min_face_confidence, config.padding_ratio),
            classifier,
            window: SmoothingWindow::new(config.window_size),
            reset_after_missed_frames: config.reset_after_missed_frames,
            missed_frames: 0,
        }
    }

    /// Locate the most confident face. Does not touch the smoothing window.
    pub fn locate(&mut self, rgb: &[u8], width: u32, height: u32) -> Option<FaceRegion> {
        self.locator.locate(rgb, width, height)
    }

    /// Run the full pipeline over one packed RGB frame.
    ///
    /// Never fails: every failure resolves to a well-formed result. The
    /// smoothing window is updated exactly once when a face is found and
    /// classified, and never otherwise.
    pub fn predict(&mut self, rgb: &[u8], width: u32, height: u32) -> PredictionResult {
        let Some(region) = self.locate(rgb, width, height) else {
            self.record_miss();
            return PredictionResult::no_face();
        };
        self.missed_frames = 0;

        let crop = preprocess::crop_rgb(rgb, width, &region);
        let Some(tensor) = preprocess::preprocess(&crop, region.width, region.height, self.classifier.input_spec())
        else {
            tracing::debug!(?region, "empty face crop");
            return PredictionResult::neutral(region);
        };

        let classification = match self.classifier.classify(&tensor) {
            Ok(classification) => classification,
            Err(ClassifierError::Unavailable) => return PredictionResult::neutral(region),
            Err(e) => {
                tracing::warn!(error = %e, "emotion classification failed");
                return PredictionResult::neutral(region);
            }
        };

        let (emotion, confidence) = self.window.push(classification.label, classification.confidence);
        tracing::debug!(
            raw = %classification.label,
            raw_confidence = classification.confidence,
            smoothed = %emotion,
            confidence,
            "emotion predicted"
        );

        PredictionResult {
            emotion: Some(emotion),
            confidence,
            probabilities: classification.probabilities,
            bbox: Some(region),
            face_detected: true,
        }
    }

    fn record_miss(&mut self) {
        self.missed_frames = self.missed_frames.saturating_add(1);
        if let Some(limit) = self.reset_after_missed_frames {
            if self.missed_frames == limit.max(1) && !self.window.is_empty() {
                tracing::debug!(missed = self.missed_frames, "face lost, clearing smoothing window");
                self.window.clear();
            }
        }
    }

    pub fn window(&self) -> &SmoothingWindow {
        &self.window
    }

    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.classifier.backend_kind()
    }

    pub fn input_spec(&self) -> InputSpec {
        self.classifier.input_spec()
    }
}
