//! Drawing of detection boxes and the caption overlay.

use std::path::Path;

use anyhow::{bail, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use rusttype::{Font, Scale};

use crate::nn::Detection;

/// Overlay color for boxes and caption.
const COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Fixed anchor of the caption text, in pixels from the top-left corner.
const CAPTION_ANCHOR: (i32, i32) = (10, 30);

const CAPTION_SCALE: Scale = Scale { x: 24.0, y: 24.0 };

/// Common locations of a usable TTF font on Linux distributions.
const FONT_SEARCH_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
];

/// Draws bounding boxes and the label caption onto frames.
pub struct Annotator {
    font: Font<'static>,
}

impl Annotator {
    pub fn from_font_bytes(data: Vec<u8>) -> Result<Self> {
        let font = Font::try_from_vec(data).context("font data could not be parsed")?;
        Ok(Self { font })
    }

    pub fn from_font_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("could not read font from {}", path.display()))?;
        Self::from_font_bytes(data)
    }

    /// Load the first font found in the standard system locations.
    pub fn load_default() -> Result<Self> {
        for path in FONT_SEARCH_PATHS {
            if Path::new(path).exists() {
                log::info!("using caption font {}", path);
                return Self::from_font_path(Path::new(path));
            }
        }
        bail!("no usable TTF font found, pass one with --font-path");
    }

    /// Draw one hollow rectangle per detection and a single caption with the
    /// current label set at the fixed anchor. An empty caption is still drawn
    /// (as nothing), so frames without detections pass through unboxed.
    pub fn annotate(&self, frame: &mut RgbImage, detections: &[Detection], caption: &str) {
        let (width, height) = frame.dimensions();
        for detection in detections {
            draw_hollow_rect_mut(frame, detection_rect(detection, width, height), COLOR);
        }

        draw_text_mut(
            frame,
            COLOR,
            CAPTION_ANCHOR.0,
            CAPTION_ANCHOR.1,
            CAPTION_SCALE,
            &self.font,
            caption,
        );
    }
}

/// Clamp a detection onto the frame as a drawable rectangle.
/// Degenerate boxes keep a minimum extent of one pixel.
fn detection_rect(detection: &Detection, width: u32, height: u32) -> Rect {
    let max_x = width.saturating_sub(1) as f32;
    let max_y = height.saturating_sub(1) as f32;

    let x1 = detection.x1.clamp(0.0, max_x);
    let y1 = detection.y1.clamp(0.0, max_y);
    let x2 = detection.x2.clamp(0.0, max_x);
    let y2 = detection.y2.clamp(0.0, max_y);

    Rect::at(x1 as i32, y1 as i32).of_size(((x2 - x1) as u32).max(1), ((y2 - y1) as u32).max(1))
}
