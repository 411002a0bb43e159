//! Frame preprocessing.
//!
//! Every raw frame is center-cropped to a square of side `min(width, height)`
//! and resized to `target x target`. The resized square is the coordinate
//! space of every bounding box the pipeline emits; boxes are never mapped back
//! to the original frame.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::frame::RawFrame;

/// Square region of a raw frame kept by the center crop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub side: u32,
}

/// Centered square crop for a `width x height` frame.
///
/// Offsets use integer division, so odd leftovers favour the top-left edge.
pub fn center_crop_region(width: u32, height: u32) -> CropRegion {
    let side = width.min(height);
    CropRegion {
        x: (width - side) / 2,
        y: (height - side) / 2,
        side,
    }
}

/// The square image handed to the detector.
pub struct ProcessedFrame {
    pub image: RgbImage,
    pub crop: CropRegion,
    pub sequence: u64,
}

impl ProcessedFrame {
    pub fn size(&self) -> u32 {
        self.image.width()
    }
}

/// Crop `frame` to its centered square and resize it to `target x target`.
pub fn prepare(frame: &RawFrame, target: u32) -> Result<ProcessedFrame> {
    if target == 0 {
        return Err(anyhow!("target size must be non-zero"));
    }
    if frame.width() == 0 || frame.height() == 0 {
        return Err(anyhow!(
            "cannot process empty frame {}x{}",
            frame.width(),
            frame.height()
        ));
    }
    let crop = center_crop_region(frame.width(), frame.height());
    let square = imageops::crop_imm(frame.image(), crop.x, crop.y, crop.side, crop.side).to_image();
    let image = if crop.side == target {
        square
    } else {
        imageops::resize(&square, target, target, FilterType::Triangle)
    };
    Ok(ProcessedFrame {
        image,
        crop,
        sequence: frame.sequence,
    })
}
