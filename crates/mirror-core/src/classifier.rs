//! Emotion classifier over ONNX Runtime.
//!
//! Two interchangeable backends run the same compact CNN: an integer-quantized
//! export (preferred) and a full-precision export (fallback). One is picked at
//! load time; when neither artifact exists the classifier stays unavailable and
//! callers report Neutral with zero confidence.

use crate::preprocess::InputSpec;
use crate::types::{EmotionLabel, Probabilities};
use ndarray::Array4;
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::{DynValue, TensorRef, ValueType};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Output scale of a quantized softmax head (zero point 0).
const QUANTIZED_OUTPUT_SCALE: f32 = 1.0 / 256.0;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("no classifier model loaded")]
    Unavailable,
    #[error("unsupported model input shape {0:?}: expected [1, H, W, 1] or [1, 1, H, W]")]
    UnsupportedInput(Vec<i64>),
    #[error("model input element type {actual:?} is not the {expected:?} this backend feeds")]
    UnsupportedInputType {
        expected: TensorElementType,
        actual: TensorElementType,
    },
    #[error("input tensor shape {actual:?} does not match model input {expected:?}")]
    InputMismatch { expected: [usize; 4], actual: Vec<usize> },
    #[error("expected {expected} class scores, got {actual}")]
    OutputLength { expected: usize, actual: usize },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Which model export is serving predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Quantized,
    FullPrecision,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Quantized => f.write_str("quantized"),
            BackendKind::FullPrecision => f.write_str("full-precision"),
        }
    }
}

/// A loaded model that maps a grayscale face tensor to raw class scores.
pub trait InferenceBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Input geometry declared by the model.
    fn input_spec(&self) -> InputSpec;

    /// Run one forward pass. `input` has the shape of [`Self::input_spec`].
    fn run(&mut self, input: &Array4<u8>) -> Result<Vec<f32>, ClassifierError>;
}

/// One frame's classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: EmotionLabel,
    pub confidence: f32,
    pub probabilities: Probabilities,
}

impl Classification {
    /// Build a classification from the model's class scores.
    ///
    /// Scores that are already a distribution are kept as-is; anything
    /// outside [0, 1] is treated as logits and passed through softmax.
    pub fn from_scores(scores: &[f32]) -> Result<Self, ClassifierError> {
        if scores.len() != EmotionLabel::COUNT {
            return Err(ClassifierError::OutputLength {
                expected: EmotionLabel::COUNT,
                actual: scores.len(),
            });
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(ClassifierError::InferenceFailed("non-finite class score".into()));
        }

        let probs = if scores.iter().all(|s| (0.0..=1.0).contains(s)) {
            scores.to_vec()
        } else {
            softmax(scores)
        };

        // First maximum wins.
        let (idx, confidence) = probs
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        let probabilities = EmotionLabel::ALL.iter().copied().zip(probs.iter().copied()).collect();

        Ok(Self {
            label: EmotionLabel::ALL[idx],
            confidence,
            probabilities,
        })
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max_logit).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// A backend can only serve a model whose input takes the element type it feeds.
fn check_input_type(actual: TensorElementType, expected: TensorElementType) -> Result<(), ClassifierError> {
    if actual == expected {
        Ok(())
    } else {
        Err(ClassifierError::UnsupportedInputType { expected, actual })
    }
}

/// Open a session and read the declared input geometry, rejecting models
/// whose input element type is not `element`.
fn open_session(
    model_path: &Path,
    what: &str,
    element: TensorElementType,
) -> Result<(Session, InputSpec), ClassifierError> {
    if !model_path.exists() {
        return Err(ClassifierError::ModelNotFound(model_path.display().to_string()));
    }

    let session = Session::builder()?
        .with_intra_threads(1)?
        .commit_from_file(model_path)?;

    let (ty, shape): (Option<TensorElementType>, Vec<i64>) = session
        .inputs()
        .first()
        .and_then(|input| match input.dtype() {
            ValueType::Tensor { ty, shape, .. } => Some((Some(*ty), shape.iter().copied().collect())),
            _ => None,
        })
        .unwrap_or_default();

    if let Some(ty) = ty {
        check_input_type(ty, element)?;
    }
    let spec = InputSpec::from_shape(&shape).ok_or_else(|| ClassifierError::UnsupportedInput(shape.clone()))?;

    tracing::info!(
        path = %model_path.display(),
        input_shape = ?shape,
        input_type = ?element,
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        edge = spec.edge,
        layout = ?spec.layout,
        "loaded {what} emotion model"
    );

    Ok((session, spec))
}

/// Read the first output as class scores, dequantizing `u8` heads.
fn read_scores(output: &DynValue) -> Result<Vec<f32>, ClassifierError> {
    if let Ok((_, data)) = output.try_extract_tensor::<f32>() {
        return Ok(data.to_vec());
    }
    let (_, data) = output
        .try_extract_tensor::<u8>()
        .map_err(|e| ClassifierError::InferenceFailed(format!("class scores: {e}")))?;
    Ok(data.iter().map(|&q| q as f32 * QUANTIZED_OUTPUT_SCALE).collect())
}

/// Integer-quantized export fed raw `u8` pixels.
pub struct QuantizedBackend {
    session: Session,
    spec: InputSpec,
}

impl QuantizedBackend {
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let (session, spec) = open_session(model_path.as_ref(), "quantized", TensorElementType::Uint8)?;
        Ok(Self { session, spec })
    }
}

impl InferenceBackend for QuantizedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Quantized
    }

    fn input_spec(&self) -> InputSpec {
        self.spec
    }

    fn run(&mut self, input: &Array4<u8>) -> Result<Vec<f32>, ClassifierError> {
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        read_scores(&outputs[0])
    }
}

/// Full-precision export fed the same pixel values as `f32`, unnormalized.
pub struct FloatBackend {
    session: Session,
    spec: InputSpec,
}

impl FloatBackend {
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let (session, spec) = open_session(model_path.as_ref(), "full-precision", TensorElementType::Float32)?;
        Ok(Self { session, spec })
    }
}

impl InferenceBackend for FloatBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FullPrecision
    }

    fn input_spec(&self) -> InputSpec {
        self.spec
    }

    fn run(&mut self, input: &Array4<u8>) -> Result<Vec<f32>, ClassifierError> {
        let input = input.mapv(f32::from);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        read_scores(&outputs[0])
    }
}

/// Emotion classifier with at most one active backend.
pub struct EmotionClassifier {
    backend: Option<Box<dyn InferenceBackend>>,
}

impl EmotionClassifier {
    /// Load the quantized export if present, else the full-precision one.
    ///
    /// Never fails: with no usable artifact the classifier is unavailable and
    /// a single warning is logged.
    pub fn load(quantized_path: impl AsRef<Path>, full_precision_path: impl AsRef<Path>) -> Self {
        let quantized_path = quantized_path.as_ref();
        let full_precision_path = full_precision_path.as_ref();

        if quantized_path.exists() {
            match QuantizedBackend::load(quantized_path) {
                Ok(backend) => return Self::with_backend(Box::new(backend)),
                Err(e) => tracing::warn!(
                    path = %quantized_path.display(),
                    error = %e,
                    "quantized emotion model failed to load, trying full-precision fallback"
                ),
            }
        }

        if full_precision_path.exists() {
            match FloatBackend::load(full_precision_path) {
                Ok(backend) => {
                    tracing::info!("using full-precision emotion model as fallback");
                    return Self::with_backend(Box::new(backend));
                }
                Err(e) => tracing::warn!(
                    path = %full_precision_path.display(),
                    error = %e,
                    "full-precision emotion model failed to load"
                ),
            }
        }

        tracing::warn!(
            quantized = %quantized_path.display(),
            full_precision = %full_precision_path.display(),
            "no emotion model available; every face will be reported as Neutral"
        );
        Self::unavailable()
    }

    pub fn with_backend(backend: Box<dyn InferenceBackend>) -> Self {
        Self { backend: Some(backend) }
    }

    pub fn unavailable() -> Self {
        Self { backend: None }
    }

    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend.as_ref().map(|b| b.kind())
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    /// Input geometry of the active backend, or the default 48×48 NHWC.
    pub fn input_spec(&self) -> InputSpec {
        self.backend.as_ref().map(|b| b.input_spec()).unwrap_or_default()
    }

    /// Classify one preprocessed face.
    ///
    /// Errors leave the classifier usable for the next call.
    pub fn classify(&mut self, input: &Array4<u8>) -> Result<Classification, ClassifierError> {
        let backend = self.backend.as_mut().ok_or(ClassifierError::Unavailable)?;

        let expected = backend.input_spec().shape();
        if input.shape() != expected {
            return Err(ClassifierError::InputMismatch {
                expected,
                actual: input.shape().to_vec(),
            });
        }

        let scores = backend.run(input)?;
        Classification::from_scores(&scores)
    }
}
