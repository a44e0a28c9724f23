//! Face crop → classifier input tensor.
//!
//! The classifier consumes raw 8-bit grayscale values (0–255): the preferred
//! backend is integer-quantized, so no float normalization happens here.

use crate::types::FaceRegion;
use ndarray::Array4;
use serde::Serialize;

/// Input edge used when no model declares one.
pub const DEFAULT_INPUT_EDGE: usize = 48;

/// Dimension order of the single-channel classifier input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TensorLayout {
    /// `[1, H, W, 1]`
    Nhwc,
    /// `[1, 1, H, W]`
    Nchw,
}

/// Input geometry declared by the loaded classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InputSpec {
    pub edge: usize,
    pub layout: TensorLayout,
}

impl Default for InputSpec {
    fn default() -> Self {
        Self {
            edge: DEFAULT_INPUT_EDGE,
            layout: TensorLayout::Nhwc,
        }
    }
}

impl InputSpec {
    /// Read the input spec from a model's declared input shape.
    ///
    /// Accepts single-channel 4-D shapes in either layout; the batch dimension
    /// may be dynamic (negative). Returns `None` for anything else.
    pub fn from_shape(shape: &[i64]) -> Option<Self> {
        let &[_, d1, d2, d3] = shape else {
            return None;
        };
        let edge = |v: i64| usize::try_from(v).ok().filter(|&e| e > 0);

        if d3 == 1 && d1 > 1 {
            Some(Self { edge: edge(d1)?, layout: TensorLayout::Nhwc })
        } else if d1 == 1 && d2 > 1 {
            Some(Self { edge: edge(d2)?, layout: TensorLayout::Nchw })
        } else {
            None
        }
    }

    pub fn shape(&self) -> [usize; 4] {
        match self.layout {
            TensorLayout::Nhwc => [1, self.edge, self.edge, 1],
            TensorLayout::Nchw => [1, 1, self.edge, self.edge],
        }
    }
}

/// Copy `region` out of a packed RGB frame that is `frame_width` pixels wide.
///
/// The region must already be clamped to the frame.
pub fn crop_rgb(rgb: &[u8], frame_width: u32, region: &FaceRegion) -> Vec<u8> {
    let stride = frame_width as usize * 3;
    let row_len = region.width as usize * 3;
    let x_off = region.x as usize * 3;

    let mut crop = Vec::with_capacity(row_len * region.height as usize);
    for y in region.y as usize..(region.y + region.height) as usize {
        let start = y * stride + x_off;
        match rgb.get(start..start + row_len) {
            Some(row) => crop.extend_from_slice(row),
            None => break,
        }
    }
    crop
}

/// Convert packed RGB to 8-bit luma with ITU-R BT.601 weights.
///
/// Uses 14-bit fixed point (0.299, 0.587, 0.114) with rounding.
pub fn rgb_to_gray(rgb: &[u8]) -> Vec<u8> {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    rgb.chunks_exact(3)
        .map(|px| ((px[0] as u32 * R + px[1] as u32 * G + px[2] as u32 * B + (1 << 13)) >> 14) as u8)
        .collect()
}

/// Area-averaging resize of a single-channel image.
///
/// Each destination pixel is the coverage-weighted mean of the source pixels
/// under its footprint, which keeps downscaled faces free of aliasing.
pub fn resize_area(src: &[u8], width: usize, height: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    let mut out = vec![0u8; new_w * new_h];
    if width == 0 || height == 0 || src.len() < width * height {
        return out;
    }

    let scale_x = width as f64 / new_w as f64;
    let scale_y = height as f64 / new_h as f64;

    for dy in 0..new_h {
        let y0 = dy as f64 * scale_y;
        let y1 = (y0 + scale_y).min(height as f64);

        for dx in 0..new_w {
            let x0 = dx as f64 * scale_x;
            let x1 = (x0 + scale_x).min(width as f64);

            let mut sum = 0.0f64;
            let mut area = 0.0f64;
            for sy in y0.floor() as usize..(y1.ceil() as usize).min(height) {
                let wy = y1.min(sy as f64 + 1.0) - y0.max(sy as f64);
                if wy <= 0.0 {
                    continue;
                }
                for sx in x0.floor() as usize..(x1.ceil() as usize).min(width) {
                    let wx = x1.min(sx as f64 + 1.0) - x0.max(sx as f64);
                    if wx <= 0.0 {
                        continue;
                    }
                    sum += src[sy * width + sx] as f64 * wx * wy;
                    area += wx * wy;
                }
            }

            out[dy * new_w + dx] = if area > 0.0 {
                (sum / area).round().clamp(0.0, 255.0) as u8
            } else {
                0
            };
        }
    }

    out
}

/// Turn an RGB face crop into a batch-of-one grayscale `u8` tensor.
///
/// Returns `None` for an empty crop.
pub fn preprocess(crop: &[u8], width: u32, height: u32, spec: InputSpec) -> Option<Array4<u8>> {
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 || crop.len() < w * h * 3 || spec.edge == 0 {
        return None;
    }

    let gray = rgb_to_gray(&crop[..w * h * 3]);
    let resized = resize_area(&gray, w, h, spec.edge, spec.edge);
    let [n, a, b, c] = spec.shape();
    Array4::from_shape_vec((n, a, b, c), resized).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_spec_from_nhwc_shape() {
        let spec = InputSpec::from_shape(&[1, 48, 48, 1]).unwrap();
        assert_eq!(spec, InputSpec { edge: 48, layout: TensorLayout::Nhwc });
        assert_eq!(spec.shape(), [1, 48, 48, 1]);
    }

    #[test]
    fn test_input_spec_from_nchw_shape_with_dynamic_batch() {
        let spec = InputSpec::from_shape(&[-1, 1, 64, 64]).unwrap();
        assert_eq!(spec, InputSpec { edge: 64, layout: TensorLayout::Nchw });
        assert_eq!(spec.shape(), [1, 1, 64, 64]);
    }

    #[test]
    fn test_input_spec_rejects_other_shapes() {
        assert!(InputSpec::from_shape(&[1, 48, 48, 3]).is_none());
        assert!(InputSpec::from_shape(&[1, 3, 48, 48]).is_none());
        assert!(InputSpec::from_shape(&[48, 48]).is_none());
        assert!(InputSpec::from_shape(&[1, -1, -1, 1]).is_none());
    }

    #[test]
    fn test_crop_rgb_extracts_rows() {
        // 4x2 frame, pixel value = its linear index
        let frame: Vec<u8> = (0..8u8).flat_map(|i| [i, i, i]).collect();
        let region = FaceRegion { x: 1, y: 0, width: 2, height: 2 };
        let crop = crop_rgb(&frame, 4, &region);
        let firsts: Vec<u8> = crop.chunks(3).map(|px| px[0]).collect();
        assert_eq!(firsts, vec![1, 2, 5, 6]);
    }

    #[test]
    fn test_rgb_to_gray_weights() {
        let gray = rgb_to_gray(&[255, 255, 255, 0, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0, 255]);
        assert_eq!(gray, vec![255, 0, 76, 150, 29]);
    }

    #[test]
    fn test_resize_area_block_average() {
        #[rustfmt::skip]
        let src = vec![
            0, 0, 100, 200,
            0, 0, 100, 200,
            10, 30, 255, 255,
            50, 70, 255, 255,
        ];
        assert_eq!(resize_area(&src, 4, 4, 2, 2), vec![0, 150, 40, 255]);
    }

    #[test]
    fn test_resize_area_uniform_stays_uniform() {
        let src = vec![93u8; 97 * 61];
        let out = resize_area(&src, 97, 61, 48, 48);
        assert!(out.iter().all(|&p| p == 93));
    }

    #[test]
    fn test_resize_area_upscale_replicates() {
        let out = resize_area(&[10, 20], 2, 1, 4, 1);
        assert_eq!(out, vec![10, 10, 20, 20]);
    }

    #[test]
    fn test_preprocess_shape_and_values() {
        let crop = vec![200u8; 120 * 90 * 3];
        let spec = InputSpec { edge: 48, layout: TensorLayout::Nhwc };
        let tensor = preprocess(&crop, 120, 90, spec).unwrap();
        assert_eq!(tensor.shape(), &[1, 48, 48, 1]);
        assert!(tensor.iter().all(|&p| p == 200));
    }

    #[test]
    fn test_preprocess_follows_declared_layout() {
        let crop = vec![10u8; 30 * 30 * 3];
        let spec = InputSpec { edge: 32, layout: TensorLayout::Nchw };
        let tensor = preprocess(&crop, 30, 30, spec).unwrap();
        assert_eq!(tensor.shape(), &[1, 1, 32, 32]);
    }

    #[test]
    fn test_preprocess_empty_crop() {
        assert!(preprocess(&[], 0, 0, InputSpec::default()).is_none());
        assert!(preprocess(&[1, 2, 3], 2, 2, InputSpec::default()).is_none());
    }
}
