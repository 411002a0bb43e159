//! Local camera capture through Video4Linux2.
//!
//! The camera is opened once by `connect` and streamed through memory-mapped
//! buffers. RGB24 is requested first; drivers that insist on YUYV or NV12 are
//! accepted and converted in `normalize`.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{FrameSource, SourceStats};
use crate::frame::RawFrame;

const MMAP_BUFFERS: u32 = 4;

#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device node, e.g. `/dev/video1`.
    pub device: String,
    /// Zero keeps the driver's frame interval.
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 30,
            width: 1280,
            height: 720,
        }
    }
}

/// Format the driver actually agreed to.
#[derive(Clone, Copy, Debug)]
struct Negotiated {
    width: u32,
    height: u32,
    format: PixelFormat,
}

#[self_referencing]
struct Capturing {
    device: Device,
    #[borrows(mut device)]
    #[covariant]
    stream: MmapStream<'this, Device>,
}

pub struct V4l2Source {
    config: V4l2Config,
    capture: Option<(Capturing, Negotiated)>,
    captured: u64,
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Result<Self> {
        if config.device.trim().is_empty() {
            return Err(anyhow!("camera device path is empty"));
        }
        Ok(Self {
            config,
            capture: None,
            captured: 0,
        })
    }

    fn negotiate(&self, device: &mut Device) -> Result<Negotiated> {
        let mut wanted = device
            .format()
            .with_context(|| format!("query format of {}", self.config.device))?;
        wanted.width = self.config.width;
        wanted.height = self.config.height;
        wanted.fourcc = FourCC::new(b"RGB3");

        let granted = match device.set_format(&wanted) {
            Ok(granted) => granted,
            Err(err) => {
                log::warn!(
                    "{} rejected {}x{} RGB3 ({}), keeping driver format",
                    self.config.device,
                    wanted.width,
                    wanted.height,
                    err
                );
                device.format()?
            }
        };

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "{} rejected {} fps: {}",
                    self.config.device,
                    self.config.target_fps,
                    err
                );
            }
        }

        Ok(Negotiated {
            width: granted.width,
            height: granted.height,
            format: pixel_format(granted.fourcc)?,
        })
    }
}

fn pixel_format(fourcc: FourCC) -> Result<PixelFormat> {
    PixelFormat::from_fourcc(&fourcc.repr).ok_or_else(|| {
        anyhow!(
            "camera delivers unsupported pixel format {}",
            String::from_utf8_lossy(&fourcc.repr)
        )
    })
}

impl FrameSource for V4l2Source {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn connect(&mut self) -> Result<()> {
        let mut device = Device::with_path(&self.config.device)
            .with_context(|| format!("open camera {}", self.config.device))?;
        let negotiated = self.negotiate(&mut device)?;

        let capturing = CapturingTryBuilder {
            device,
            stream_builder: |device| {
                MmapStream::with_buffers(device, Type::VideoCapture, MMAP_BUFFERS)
                    .context("map camera buffers")
            },
        }
        .try_build()?;

        log::info!(
            "camera {} streaming {}x{} {:?}",
            self.config.device,
            negotiated.width,
            negotiated.height,
            negotiated.format
        );
        self.capture = Some((capturing, negotiated));
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        let (capturing, negotiated) = self
            .capture
            .as_mut()
            .ok_or_else(|| anyhow!("camera {} is not connected", self.config.device))?;
        let negotiated = *negotiated;

        let rgb = capturing.with_stream_mut(|stream| -> Result<Vec<u8>> {
            let (buf, meta) = stream.next().context("dequeue camera buffer")?;
            // The mapped buffer can be longer than the payload.
            let used = match meta.bytesused as usize {
                0 => buf.len(),
                n => n.min(buf.len()),
            };
            normalize_to_rgb(
                &buf[..used],
                negotiated.width,
                negotiated.height,
                negotiated.format,
            )
        })?;

        self.captured += 1;
        RawFrame::from_rgb(rgb, negotiated.width, negotiated.height, self.captured).map(Some)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.captured,
            source: self.config.device.clone(),
        }
    }
}
