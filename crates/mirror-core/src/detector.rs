//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the lightweight SCRFD variant on RGB frames with 3-stride anchor-free
//! decoding and NMS post-processing. Keypoint heads, when the export has them,
//! are ignored: the emotion pipeline only needs the box.

use crate::locator::FaceLocator;
use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
/// score + bbox heads per stride; keypoint heads are optional.
const SCRFD_MIN_OUTPUTS: usize = 6;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; place the SCRFD export in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height} RGB")]
    InvalidFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    input_height: usize,
    input_width: usize,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, DetectorError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < SCRFD_MIN_OUTPUTS {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires at least {SCRFD_MIN_OUTPUTS} outputs (3 strides × score/bbox), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            input_height: SCRFD_INPUT_SIZE,
            input_width: SCRFD_INPUT_SIZE,
            stride_indices,
        })
    }

    /// Detect faces in a packed RGB frame, returning boxes sorted by confidence.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let expected = width as usize * height as usize * 3;
        if width == 0 || height == 0 || frame.len() != expected {
            return Err(DetectorError::InvalidFrame {
                width,
                height,
                expected,
                actual: frame.len(),
            });
        }

        let (input, letterbox) = self.preprocess(frame, width as usize, height as usize);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                stride,
                self.input_width,
                self.input_height,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        // nms() already returns survivors in descending confidence order.
        Ok(nms(all_detections, SCRFD_NMS_THRESHOLD))
    }

    /// Letterbox an RGB frame into a normalized NCHW float tensor.
    fn preprocess(&self, frame: &[u8], width: usize, height: usize) -> (Array4<f32>, LetterboxInfo) {
        let scale_w = self.input_width as f32 / width as f32;
        let scale_h = self.input_height as f32 / height as f32;
        let scale = scale_w.min(scale_h);

        let new_w = ((width as f32 * scale).round() as usize).clamp(1, self.input_width);
        let new_h = ((height as f32 * scale).round() as usize).clamp(1, self.input_height);
        let pad_x = (self.input_width - new_w) as f32 / 2.0;
        let pad_y = (self.input_height - new_h) as f32 / 2.0;

        let letterbox = LetterboxInfo { scale, pad_x, pad_y };
        let resized = resize_bilinear_rgb(frame, width, height, new_w, new_h);

        let pad_x_start = pad_x.floor() as usize;
        let pad_y_start = pad_y.floor() as usize;

        // Padding is left at zero, which is SCRFD_MEAN after normalization.
        let mut tensor = Array4::<f32>::zeros((1, 3, self.input_height, self.input_width));

        for y in 0..new_h {
            for x in 0..new_w {
                let src = (y * new_w + x) * 3;
                for c in 0..3 {
                    tensor[[0, c, y + pad_y_start, x + pad_x_start]] =
                        (resized[src + c] as f32 - SCRFD_MEAN) / SCRFD_STD;
                }
            }
        }

        (tensor, letterbox)
    }
}

impl FaceLocator for FaceDetector {
    fn detect(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, DetectorError> {
        FaceDetector::detect(self, rgb, width, height)
    }
}

/// Bilinear resize of a packed RGB buffer.
fn resize_bilinear_rgb(frame: &[u8], width: usize, height: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    let inv_scale_x = width as f32 / new_w as f32;
    let inv_scale_y = height as f32 / new_h as f32;
    let mut resized = vec![0u8; new_w * new_h * 3];

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * inv_scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * inv_scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                let tl = frame[(y0 * width + x0) * 3 + c] as f32;
                let tr = frame[(y0 * width + x1) * 3 + c] as f32;
                let bl = frame[(y1 * width + x0) * 3 + c] as f32;
                let br = frame[(y1 * width + x1) * 3 + c] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                resized[(y * new_w + x) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    resized
}

/// Map output tensors to stride slots.
///
/// Named exports ("score_8", "bbox_16", ...) are matched by name. Otherwise the
/// standard positional ordering is assumed: [0-2] = scores, [3-5] = bboxes.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let mut named = [(0, 0); 3];
    for (slot, &stride) in named.iter_mut().zip(SCRFD_STRIDES.iter()) {
        match (find("score", stride), find("bbox", stride)) {
            (Some(score), Some(bbox)) => *slot = (score, bbox),
            _ => {
                tracing::info!(
                    ?names,
                    "SCRFD: output names not recognized, using positional mapping [0-2]=scores, [3-5]=bboxes"
                );
                return [(0, 3), (1, 4), (2, 5)];
            }
        }
    }

    tracing::info!("SCRFD: using name-based output tensor mapping");
    named
}

/// Boxes from one SCRFD head scoring above `threshold`, in frame pixels.
///
/// Anchors sit on a `stride`-spaced grid, `SCRFD_ANCHORS_PER_CELL` per cell.
/// Each one regresses its distance to the left, top, right and bottom edge
/// of the face, in multiples of the stride.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    input_width: usize,
    input_height: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<BoundingBox> {
    let cols = input_width / stride;
    let anchors = cols * (input_height / stride) * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;
    let unmap = |v: f32, pad: f32| (v - pad) / letterbox.scale;

    scores
        .iter()
        .copied()
        .zip(bboxes.chunks_exact(4))
        .take(anchors)
        .enumerate()
        .filter(|&(_, (score, _))| score > threshold)
        .map(|(anchor, (score, edges))| {
            let cell = anchor / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % cols * stride) as f32;
            let cy = (cell / cols * stride) as f32;

            let left = unmap(cx - edges[0] * step, letterbox.pad_x);
            let top = unmap(cy - edges[1] * step, letterbox.pad_y);
            let right = unmap(cx + edges[2] * step, letterbox.pad_x);
            let bottom = unmap(cy + edges[3] * step, letterbox.pad_y);

            BoundingBox {
                x: left,
                y: top,
                width: right - left,
                height: bottom - top,
                confidence: score,
            }
        })
        .collect()
}

/// Greedy suppression, most confident first: a box survives unless it
/// overlaps an already kept box by more than `iou_threshold`.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Shared area over combined area. Boxes with no area score 0.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let overlap = |a0: f32, a1: f32, b0: f32, b1: f32| (a1.min(b1) - a0.max(b0)).max(0.0);
    let shared = overlap(a.x, a.x + a.width, b.x, b.x + b.width) * overlap(a.y, a.y + a.height, b.y, b.y + b.height);
    let combined = a.width * a.height + b.width * b.height - shared;

    if combined > 0.0 {
        shared / combined
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: conf }
    }

    fn identity_letterbox() -> LetterboxInfo {
        LetterboxInfo { scale: 1.0, pad_x: 0.0, pad_y: 0.0 }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        // 50 / (100 + 100 - 50)
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping_and_sorts() {
        let detections = vec![
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_only_kept_boxes_suppress() {
        // b overlaps a and is dropped; c overlaps only b, so it stays.
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 0.9);
        let b = make_bbox(50.0, 0.0, 100.0, 100.0, 0.8);
        let c = make_bbox(100.0, 0.0, 100.0, 100.0, 0.7);
        let result = nms(vec![c, b, a], 0.3);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        // stride 32 on a 64x64 input → 2x2 grid, 8 anchors
        let mut scores = vec![0.0f32; 8];
        let mut bboxes = vec![0.0f32; 8 * 4];
        // anchor idx 3 → cell 1 → (cx, cy) = (32, 0)
        scores[3] = 0.9;
        bboxes[12..16].copy_from_slice(&[0.5, 0.0, 1.0, 2.0]);

        let dets = decode_stride(&scores, &bboxes, 32, 64, 64, &identity_letterbox(), 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.x - 16.0).abs() < 1e-4);
        assert!((d.y - 0.0).abs() < 1e-4);
        assert!((d.width - 48.0).abs() < 1e-4);
        assert!((d.height - 64.0).abs() < 1e-4);
        assert!((d.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stride_threshold_is_exclusive() {
        let scores = vec![0.5f32; 8];
        let bboxes = vec![1.0f32; 32];
        assert!(decode_stride(&scores, &bboxes, 32, 64, 64, &identity_letterbox(), 0.5).is_empty());
    }

    #[test]
    fn test_decode_stride_undoes_letterbox() {
        let mut scores = vec![0.0f32; 8];
        let bboxes = vec![0.0f32; 32];
        scores[0] = 0.8;
        let letterbox = LetterboxInfo { scale: 2.0, pad_x: 10.0, pad_y: 20.0 };
        let dets = decode_stride(&scores, &bboxes, 32, 64, 64, &letterbox, 0.5);
        // zero-size box at anchor (0, 0) maps to ((0-10)/2, (0-20)/2)
        assert!((dets[0].x + 5.0).abs() < 1e-4);
        assert!((dets[0].y + 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "bbox_8", "score_8", "kps_8",
            "bbox_16", "score_16", "kps_16",
            "bbox_32", "score_32", "kps_32",
        ].iter().map(|s| s.to_string()).collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(1, 0), (4, 3), (7, 6)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..6).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_bilinear_resize_uniform_rgb() {
        let (w, h) = (40usize, 30usize);
        let frame: Vec<u8> = std::iter::repeat([10u8, 128, 250]).take(w * h).flatten().collect();
        let resized = resize_bilinear_rgb(&frame, w, h, 80, 60);
        assert_eq!(resized.len(), 80 * 60 * 3);
        assert!(resized.chunks(3).all(|px| px == [10, 128, 250]));
    }

    #[test]
    fn test_bilinear_resize_keeps_channels_apart() {
        // 2x1 frame: pure red then pure blue, downscaled to a single pixel
        let frame = vec![255u8, 0, 0, 0, 0, 255];
        let resized = resize_bilinear_rgb(&frame, 2, 1, 1, 1);
        assert_eq!(resized[1], 0, "green must stay empty");
        assert!(resized[0] > 0 && resized[2] > 0);
    }

    #[test]
    fn test_letterbox_coordinate_roundtrip() {
        let (width, height) = (320.0f32, 240.0f32);
        let scale = (640.0 / width).min(640.0 / height);
        let pad_x = (640.0 - (width * scale).round()) / 2.0;
        let pad_y = (640.0 - (height * scale).round()) / 2.0;
        let letterbox = LetterboxInfo { scale, pad_x, pad_y };

        let (orig_x, orig_y) = (100.0f32, 50.0f32);
        let recovered_x = (orig_x * scale + pad_x - letterbox.pad_x) / letterbox.scale;
        let recovered_y = (orig_y * scale + pad_y - letterbox.pad_y) / letterbox.scale;

        assert!((recovered_x - orig_x).abs() < 0.1, "x: {recovered_x} vs {orig_x}");
        assert!((recovered_y - orig_y).abs() < 0.1, "y: {recovered_y} vs {orig_y}");
    }
}
