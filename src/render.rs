//! Local preview of the annotated frame.
//!
//! Rendering is a side channel: it never affects what goes on the wire, and
//! failures are logged and swallowed by the session loop. Headless deployments
//! use `Headless`; `SnapshotPreview` keeps the latest annotated frame on disk
//! as a JPEG for any image viewer that reloads it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::wire::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: i32 = 2;
const GLYPH_SCALE: i32 = 2;
const GLYPH_ADVANCE: i32 = 6;
const GLYPH_ROWS: i32 = 7;

/// Sink for annotated frames.
pub trait Preview {
    fn show(&mut self, image: &RgbImage, detections: &[Detection]) -> Result<()>;
}

/// Discards every frame.
#[derive(Default)]
pub struct Headless;

impl Preview for Headless {
    fn show(&mut self, _image: &RgbImage, _detections: &[Detection]) -> Result<()> {
        Ok(())
    }
}

/// Writes the latest annotated frame to a JPEG file.
///
/// The frame is written next to the target and renamed over it, so readers
/// never observe a half-written file.
pub struct SnapshotPreview {
    path: PathBuf,
    staging: PathBuf,
}

impl SnapshotPreview {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut staging = path.clone().into_os_string();
        staging.push(".tmp.jpg");
        Self {
            path,
            staging: PathBuf::from(staging),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Preview for SnapshotPreview {
    fn show(&mut self, image: &RgbImage, detections: &[Detection]) -> Result<()> {
        let mut canvas = image.clone();
        annotate(&mut canvas, detections);
        canvas
            .save_with_format(&self.staging, image::ImageFormat::Jpeg)
            .with_context(|| format!("failed to write preview {}", self.staging.display()))?;
        std::fs::rename(&self.staging, &self.path)
            .with_context(|| format!("failed to publish preview {}", self.path.display()))?;
        Ok(())
    }
}

/// Draw each box in red with its class name in white just above it.
pub fn annotate(image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
        let [x1, y1, x2, y2] = detection.bbox;
        for inset in 0..BOX_THICKNESS {
            let width = (x2 - x1 + 1 - 2 * inset).max(1) as u32;
            let height = (y2 - y1 + 1 - 2 * inset).max(1) as u32;
            draw_hollow_rect_mut(
                image,
                Rect::at(x1 + inset, y1 + inset).of_size(width, height),
                BOX_COLOR,
            );
        }
        let label_y = y1 - 5 - GLYPH_ROWS * GLYPH_SCALE;
        draw_label(image, x1, label_y, &detection.class_name, LABEL_COLOR);
    }
}

fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col * GLYPH_SCALE;
                        let py = y + row as i32 * GLYPH_SCALE;
                        draw_filled_rect_mut(
                            image,
                            Rect::at(px, py).of_size(GLYPH_SCALE as u32, GLYPH_SCALE as u32),
                            color,
                        );
                    }
                }
            }
        }
        x += GLYPH_ADVANCE * GLYPH_SCALE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        _ => return None,
    };
    Some(rows)
}
