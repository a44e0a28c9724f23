//! Draw prediction results onto RGB images for preview and debugging.
//!
//! The face outline and label background are always drawn. Label text needs
//! a TrueType font, which is looked up at runtime (`MIRROR_FONT`, then a few
//! common system locations); without one the text is skipped.

use crate::types::{FaceRegion, PredictionResult};
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const FACE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const LABEL_BACKGROUND: Rgb<u8> = FACE_COLOR;
pub const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
pub const NO_FACE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const NO_FACE_TEXT: &str = "No Face Detected";

const OUTLINE_THICKNESS: u32 = 2;
const LABEL_SCALE: f32 = 24.0;
const NO_FACE_SCALE: f32 = 21.0;
/// Top-left corner of the label background.
const LABEL_ORIGIN: (i32, i32) = (10, 10);
/// Space between the background edge and the text.
const LABEL_PADDING: u32 = 5;

/// Where a font is searched for when `MIRROR_FONT` is unset.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
];

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("failed to read font {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("not a usable font file: {0}")]
    InvalidFont(PathBuf),
}

/// `"{emotion}: {confidence}"` with the confidence as a two-decimal percentage.
pub fn label_text(result: &PredictionResult) -> String {
    format!("{}: {:.2}%", result.emotion_name(), result.confidence * 100.0)
}

/// Outline `region` in `color`, `thickness` pixels wide, growing inward.
pub fn draw_region(image: &mut RgbImage, region: &FaceRegion, color: Rgb<u8>, thickness: u32) {
    for i in 0..thickness.max(1) {
        let inset = 2 * i;
        if region.width <= inset || region.height <= inset {
            break;
        }
        let rect = Rect::at((region.x + i) as i32, (region.y + i) as i32)
            .of_size(region.width - inset, region.height - inset);
        draw_hollow_rect_mut(image, rect, color);
    }
}

/// Draws prediction overlays. Holds the label font, if one was found.
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new(font: Option<FontVec>) -> Self {
        Self { font }
    }

    /// Use `MIRROR_FONT` if set, else the first readable system font.
    pub fn from_env() -> Self {
        let candidates = std::env::var_os("MIRROR_FONT")
            .map(PathBuf::from)
            .into_iter()
            .chain(SYSTEM_FONTS.iter().map(PathBuf::from));

        for path in candidates {
            match load_font(&path) {
                Ok(font) => {
                    tracing::debug!(path = %path.display(), "annotation font loaded");
                    return Self::new(Some(font));
                }
                Err(e) => tracing::trace!(error = %e, "annotation font skipped"),
            }
        }
        tracing::debug!("no annotation font found; labels drawn without text");
        Self::new(None)
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw `result` onto `image`. Returns whether a face was outlined.
    ///
    /// A face gets a green outline plus a filled label box holding
    /// `"{emotion}: {confidence}"`. No face gets red "No Face Detected"
    /// text when a font is available.
    pub fn annotate(&self, image: &mut RgbImage, result: &PredictionResult) -> bool {
        let (true, Some(region)) = (result.face_detected, result.bbox) else {
            if let Some(font) = &self.font {
                draw_text_mut(image, NO_FACE_COLOR, 10, 12, PxScale::from(NO_FACE_SCALE), font, NO_FACE_TEXT);
            }
            return false;
        };

        draw_region(image, &region, FACE_COLOR, OUTLINE_THICKNESS);

        let text = label_text(result);
        let (text_w, text_h) = self.text_extent(&text);
        let (x, y) = LABEL_ORIGIN;
        let background = Rect::at(x, y).of_size(text_w + 2 * LABEL_PADDING, text_h + 2 * LABEL_PADDING);
        draw_filled_rect_mut(image, background, LABEL_BACKGROUND);

        if let Some(font) = &self.font {
            let pad = LABEL_PADDING as i32;
            draw_text_mut(image, LABEL_TEXT_COLOR, x + pad, y + pad, PxScale::from(LABEL_SCALE), font, &text);
        }
        true
    }

    /// Pixel size of `text` at the label scale, estimated when no font is loaded.
    fn text_extent(&self, text: &str) -> (u32, u32) {
        match &self.font {
            Some(font) => {
                let (w, h) = text_size(PxScale::from(LABEL_SCALE), font, text);
                (w.max(1), h.max(1))
            }
            None => {
                let advance = (LABEL_SCALE * 0.55) as u32;
                (advance * text.chars().count().max(1) as u32, LABEL_SCALE as u32)
            }
        }
    }
}

/// Read a TrueType/OpenType font from disk.
pub fn load_font(path: &Path) -> Result<FontVec, AnnotateError> {
    let bytes = std::fs::read(path).map_err(|source| AnnotateError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    FontVec::try_from_vec(bytes).map_err(|_| AnnotateError::InvalidFont(path.to_path_buf()))
}
