//! Synthetic frame source for tests and headless demos.
//!
//! `stub://name` produces an endless stream of generated frames.
//! Query parameters adjust it:
//! - `frames=N` ends the stream after N frames
//! - `width=W`, `height=H` override the configured frame size

use anyhow::{anyhow, Result};

use super::{FrameSource, SourceStats};
use crate::config::SourceSettings;
use crate::frame::RawFrame;

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Total frames to produce; `None` means unbounded.
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "stub://camera".to_string(),
            width: 640,
            height: 480,
            frame_limit: None,
        }
    }
}

impl SyntheticConfig {
    pub fn from_uri(uri: &str, settings: &SourceSettings) -> Result<Self> {
        let rest = uri
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic source requires a stub:// uri"))?;
        let (_, query) = rest.split_once('?').unwrap_or((rest, ""));

        let mut config = Self {
            name: uri.to_string(),
            width: settings.width,
            height: settings.height,
            frame_limit: None,
        };
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed stub parameter '{}'", pair))?;
            match key {
                "frames" => config.frame_limit = Some(parse_param(key, value)?),
                "width" => config.width = parse_param(key, value)?,
                "height" => config.height = parse_param(key, value)?,
                _ => return Err(anyhow!("unknown stub parameter '{}'", key)),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("synthetic frame size must be non-zero"));
        }
        Ok(config)
    }
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("stub parameter '{}' must be an integer, got '{}'", key, value))
}

/// Generates a slowly shifting gradient so consecutive frames differ.
pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let shift = self.frame_count as usize;
        let mut pixels = vec![0u8; width * height * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = i % width;
            let y = i / width;
            px[0] = ((x + shift) % 256) as u8;
            px[1] = ((y + shift) % 256) as u8;
            px[2] = ((x + y) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.config.name,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if let Some(limit) = self.config.frame_limit {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        RawFrame::from_rgb(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        )
        .map(Some)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_source_keeps_producing() -> Result<()> {
        let mut source = SyntheticSource::new(SyntheticConfig::default());
        source.connect()?;
        for expected in 1..=5 {
            let frame = source.next_frame()?.expect("frame");
            assert_eq!(frame.sequence, expected);
            assert_eq!((frame.width(), frame.height()), (640, 480));
        }
        assert_eq!(source.stats().frames_captured, 5);
        Ok(())
    }

    #[test]
    fn consecutive_frames_differ() -> Result<()> {
        let mut source = SyntheticSource::new(SyntheticConfig {
            width: 8,
            height: 8,
            ..SyntheticConfig::default()
        });
        let first = source.next_frame()?.expect("frame");
        let second = source.next_frame()?.expect("frame");
        assert_ne!(first.image().as_raw(), second.image().as_raw());
        Ok(())
    }

    #[test]
    fn frame_limit_ends_stream() -> Result<()> {
        let settings = SourceSettings::default();
        let config = SyntheticConfig::from_uri("stub://limited?frames=1", &settings)?;
        let mut source = SyntheticSource::new(config);
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn rejects_bad_parameters() {
        let settings = SourceSettings::default();
        assert!(SyntheticConfig::from_uri("stub://x?frames=many", &settings).is_err());
        assert!(SyntheticConfig::from_uri("stub://x?fps=3", &settings).is_err());
        assert!(SyntheticConfig::from_uri("stub://x?width=0", &settings).is_err());
    }
}
