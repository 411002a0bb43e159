//! Raw captured frames.
//!
//! A `RawFrame` holds tightly packed RGB8 pixels exactly as a source produced
//! them. Frames are created fresh per capture and dropped once the processed
//! square has been derived from them.

use anyhow::{anyhow, Result};
use image::RgbImage;

/// One captured frame, RGB8, row-major.
pub struct RawFrame {
    image: RgbImage,

    /// Monotonic sequence number assigned by the source (starts at 1).
    pub sequence: u64,
}

impl RawFrame {
    /// Wrap packed RGB bytes. The length must match `width * height * 3`.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("failed to wrap {}x{} frame", width, height))?;
        Ok(Self { image, sequence })
    }

    pub fn from_image(image: RgbImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}
