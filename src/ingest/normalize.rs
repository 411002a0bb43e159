//! Conversion of camera buffers to packed RGB24.

use anyhow::{anyhow, Result};

/// Buffer layouts a capture device may hand back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    /// Packed 4:2:2, `Y0 U Y1 V` per pixel pair.
    Yuyv,
    /// Full luma plane followed by an interleaved half-resolution `UV` plane.
    Nv12,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        match code {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            b"NV12" => Some(Self::Nv12),
            _ => None,
        }
    }

    /// Bytes one full frame occupies.
    pub(crate) fn frame_len(self, width: u32, height: u32) -> Result<usize> {
        if width == 0 || height == 0 {
            return Err(anyhow!("{:?} frame has zero size {}x{}", self, width, height));
        }
        if self != Self::Rgb24 && width % 2 != 0 {
            return Err(anyhow!("{:?} frame width must be even, got {}", self, width));
        }
        if self == Self::Nv12 && height % 2 != 0 {
            return Err(anyhow!("NV12 frame height must be even, got {}", height));
        }
        let pixels = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions {}x{} overflow", width, height))?;
        let len = match self {
            Self::Rgb24 => pixels.checked_mul(3),
            Self::Yuyv => pixels.checked_mul(2),
            Self::Nv12 => pixels.checked_add(pixels / 2),
        };
        len.ok_or_else(|| anyhow!("frame dimensions {}x{} overflow", width, height))
    }
}

/// Convert one captured buffer to tightly packed RGB24.
pub(crate) fn normalize_to_rgb(
    buf: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let expected = format.frame_len(width, height)?;
    if buf.len() != expected {
        return Err(anyhow!(
            "{:?} buffer holds {} bytes, {}x{} needs {}",
            format,
            buf.len(),
            width,
            height,
            expected
        ));
    }
    let rgb = match format {
        PixelFormat::Rgb24 => buf.to_vec(),
        PixelFormat::Yuyv => buf
            .chunks_exact(4)
            .flat_map(|q| [ycbcr_to_rgb(q[0], q[1], q[3]), ycbcr_to_rgb(q[2], q[1], q[3])])
            .flatten()
            .collect(),
        PixelFormat::Nv12 => nv12_to_rgb(buf, width as usize),
    };
    Ok(rgb)
}

fn nv12_to_rgb(buf: &[u8], width: usize) -> Vec<u8> {
    let (luma, chroma) = buf.split_at(buf.len() / 3 * 2);
    let mut rgb = Vec::with_capacity(luma.len() * 3);
    for (row, luma_row) in luma.chunks_exact(width).enumerate() {
        let chroma_row = &chroma[(row / 2) * width..][..width];
        for (col, &y) in luma_row.iter().enumerate() {
            let uv = col & !1;
            rgb.extend_from_slice(&ycbcr_to_rgb(y, chroma_row[uv], chroma_row[uv + 1]));
        }
    }
    rgb
}

/// BT.601 full-range.
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = y as f32;
    let cb = cb as f32 - 128.0;
    let cr = cr as f32 - 128.0;
    let channel = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    [
        channel(y + 1.402 * cr),
        channel(y - 0.344_136 * cb - 0.714_136 * cr),
        channel(y + 1.772 * cb),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_chroma_nv12_is_gray() -> Result<()> {
        let mut nv12 = vec![128u8; 4];
        nv12.extend_from_slice(&[128, 128]);
        assert_eq!(normalize_to_rgb(&nv12, 2, 2, PixelFormat::Nv12)?, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn nv12_shares_chroma_across_pixel_pairs() -> Result<()> {
        // 4x2 frame, two chroma samples: neutral on the left, red-shifted on the right.
        let mut nv12 = vec![100u8; 8];
        nv12.extend_from_slice(&[128, 128, 128, 200]);
        let rgb = normalize_to_rgb(&nv12, 4, 2, PixelFormat::Nv12)?;
        assert_eq!(&rgb[0..3], &[100, 100, 100]);
        assert_eq!(&rgb[3..6], &[100, 100, 100]);
        assert!(rgb[6] > 150);
        assert_eq!(&rgb[6..9], &rgb[9..12]);
        assert_eq!(&rgb[..12], &rgb[12..]);
        Ok(())
    }

    #[test]
    fn yuyv_keeps_luma_per_pixel() -> Result<()> {
        let rgb = normalize_to_rgb(&[16, 128, 235, 128], 2, 1, PixelFormat::Yuyv)?;
        assert_eq!(rgb, vec![16, 16, 16, 235, 235, 235]);
        Ok(())
    }

    #[test]
    fn rejects_odd_widths_for_subsampled_formats() {
        assert!(normalize_to_rgb(&[0u8; 6], 3, 1, PixelFormat::Yuyv).is_err());
        assert!(PixelFormat::Nv12.frame_len(2, 3).is_err());
        assert!(PixelFormat::Rgb24.frame_len(3, 3).is_ok());
    }

    #[test]
    fn rgb_passes_through_after_length_check() -> Result<()> {
        let pixels = vec![1u8; 9];
        assert_eq!(normalize_to_rgb(&pixels, 1, 3, PixelFormat::Rgb24)?, pixels);
        assert!(normalize_to_rgb(&pixels, 2, 3, PixelFormat::Rgb24).is_err());
        assert!(normalize_to_rgb(&[], 0, 3, PixelFormat::Rgb24).is_err());
        Ok(())
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }
}
