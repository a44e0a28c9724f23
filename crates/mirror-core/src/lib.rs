//! mirror-core — Facial emotion inference for the Emotion Practice game.
//!
//! Locates the most confident face with SCRFD, classifies a grayscale crop
//! into one of eight emotions with a compact CNN (quantized or full-precision
//! ONNX export), and smooths the label over the last few frames. All models
//! run on the CPU via ONNX Runtime.

pub mod annotate;
pub mod classifier;
pub mod detector;
pub mod locator;
pub mod pipeline;
pub mod preprocess;
pub mod smoother;
pub mod types;

use std::path::PathBuf;

pub use classifier::{BackendKind, Classification, ClassifierError, EmotionClassifier, InferenceBackend};
pub use detector::{DetectorError, FaceDetector};
pub use locator::FaceLocator;
pub use pipeline::{EmotionPipeline, PipelineConfig, PipelineError};
pub use preprocess::{InputSpec, TensorLayout};
pub use smoother::SmoothingWindow;
pub use types::{BoundingBox, EmotionLabel, FaceRegion, PredictionResult, Probabilities, UnknownEmotion};

/// Model directory: `$MIRROR_MODEL_DIR`, else `models/` under the working directory.
pub fn default_model_dir() -> PathBuf {
    std::env::var_os("MIRROR_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("models"))
}
