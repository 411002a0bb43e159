//! Frame ingestion sources.
//!
//! This module provides different sources for raw frames:
//! - Synthetic frames (`stub://`), optionally finite
//! - A directory of still images (`dir://`), finite by construction
//! - Local V4L2 cameras (`v4l2://` or a bare device index, feature: ingest-v4l2)
//!
//! A source is opened once at process start and shared by every session.
//! Once it has reported end-of-stream or a read failure it stays exhausted:
//! the device is not reopened and every later read returns `Ok(None)`.

pub mod images;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};

use crate::config::SourceSettings;
use crate::frame::RawFrame;

pub use images::ImageDirSource;
pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// A lazy, non-restartable sequence of raw frames.
pub trait FrameSource {
    /// Source identifier for logs.
    fn name(&self) -> &'static str;

    /// Open the underlying device. Called once at startup.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame. `Ok(None)` marks the end of the stream.
    fn next_frame(&mut self) -> Result<Option<RawFrame>>;

    fn stats(&self) -> SourceStats;
}

/// Open the source named by `settings.uri` and wrap it so exhaustion latches.
///
/// Accepted forms:
/// - `stub://name[?frames=N&width=W&height=H]`
/// - `dir:///path/to/images`
/// - `v4l2:///dev/videoN` or a bare device index such as `1`
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let uri = settings.uri.trim();
    let inner: Box<dyn FrameSource> = if uri.starts_with("stub://") {
        Box::new(SyntheticSource::new(SyntheticConfig::from_uri(uri, settings)?))
    } else if let Some(path) = uri.strip_prefix("dir://") {
        Box::new(ImageDirSource::new(path)?)
    } else if let Some(device) = camera_device(uri) {
        open_camera(device, settings)?
    } else {
        return Err(anyhow!("unsupported frame source '{}'", uri));
    };
    Ok(Box::new(LatchedSource::new(inner)))
}

/// Maps `v4l2:///dev/videoN` and bare indices to a device node path.
fn camera_device(uri: &str) -> Option<String> {
    if let Some(path) = uri.strip_prefix("v4l2://") {
        return Some(path.to_string());
    }
    uri.parse::<u32>().ok().map(|index| format!("/dev/video{}", index))
}

#[cfg(feature = "ingest-v4l2")]
fn open_camera(device: String, settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(V4l2Source::new(v4l2::V4l2Config {
        device,
        target_fps: settings.target_fps,
        width: settings.width,
        height: settings.height,
    })?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_camera(device: String, _settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "camera {} requires the ingest-v4l2 feature",
        device
    ))
}

/// Wrapper that turns the first end-of-stream or read failure into a
/// permanent end-of-stream.
pub struct LatchedSource {
    inner: Box<dyn FrameSource>,
    exhausted: bool,
}

impl LatchedSource {
    pub fn new(inner: Box<dyn FrameSource>) -> Self {
        Self {
            inner,
            exhausted: false,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl FrameSource for LatchedSource {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn connect(&mut self) -> Result<()> {
        self.inner.connect()
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.exhausted {
            return Ok(None);
        }
        match self.inner.next_frame() {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => {
                self.exhausted = true;
                Ok(None)
            }
            Err(err) => {
                self.exhausted = true;
                Err(err)
            }
        }
    }

    fn stats(&self) -> SourceStats {
        self.inner.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSource {
        reads: u64,
    }

    impl FrameSource for FailingSource {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<RawFrame>> {
            self.reads += 1;
            if self.reads == 1 {
                Ok(Some(RawFrame::from_rgb(vec![0; 3], 1, 1, 1)?))
            } else {
                Err(anyhow!("device unplugged"))
            }
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.reads,
                source: "failing".to_string(),
            }
        }
    }

    fn settings(uri: &str) -> SourceSettings {
        SourceSettings {
            uri: uri.to_string(),
            ..SourceSettings::default()
        }
    }

    #[test]
    fn latched_source_stays_exhausted_after_failure() {
        let mut source = LatchedSource::new(Box::new(FailingSource { reads: 0 }));
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().is_err());
        assert!(source.is_exhausted());
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.stats().frames_captured, 2);
    }

    #[test]
    fn open_source_parses_stub_uri() -> Result<()> {
        let mut source = open_source(&settings("stub://bench?frames=2&width=32&height=16"))?;
        source.connect()?;
        let frame = source.next_frame()?.expect("first frame");
        assert_eq!((frame.width(), frame.height()), (32, 16));
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn open_source_rejects_unknown_scheme() {
        assert!(open_source(&settings("rtsp://camera")).is_err());
    }

    #[test]
    fn camera_device_maps_index_and_uri() {
        assert_eq!(camera_device("1").as_deref(), Some("/dev/video1"));
        assert_eq!(
            camera_device("v4l2:///dev/video3").as_deref(),
            Some("/dev/video3")
        );
        assert_eq!(camera_device("stub://x"), None);
    }
}
