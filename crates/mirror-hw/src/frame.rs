//! Frame type and pixel conversion to packed RGB.

use std::time::Instant;

/// A captured camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
        }
    }

    /// Non-empty and exactly `width * height * 3` bytes.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == rgb_len(self.width, self.height)
    }
}

fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Convert packed YUYV (4:2:2) to packed RGB using BT.601 studio-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U and V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = width as usize * height as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected || pixels % 2 != 0 {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let d = chunk[1] as i32 - 128;
        let e = chunk[3] as i32 - 128;
        for y in [chunk[0], chunk[2]] {
            let c = 298 * (y as i32 - 16);
            rgb.push(clamp_u8((c + 409 * e + 128) >> 8));
            rgb.push(clamp_u8((c - 100 * d - 208 * e + 128) >> 8));
            rgb.push(clamp_u8((c + 516 * d + 128) >> 8));
        }
    }
    Ok(rgb)
}

/// Expand 8-bit grayscale to RGB by replicating each sample.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize;
    if gray.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: gray.len(),
        });
    }
    Ok(gray[..expected].iter().flat_map(|&g| [g, g, g]).collect())
}

/// Copy the first `width * height * 3` bytes of an RGB24 buffer.
pub fn rgb_from_buffer(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = rgb_len(width, height);
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok(buf[..expected].to_vec())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
