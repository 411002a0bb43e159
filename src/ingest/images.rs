//! Still-image directory source.
//!
//! Replays every `.png`, `.jpg` and `.jpeg` file of a local directory in
//! lexical order, one frame per file, then ends the stream.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::{FrameSource, SourceStats};
use crate::frame::RawFrame;

pub struct ImageDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    frame_count: u64,
}

impl ImageDirSource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if dir.as_os_str().is_empty() {
            return Err(anyhow!("image directory path is empty"));
        }
        Ok(Self {
            dir,
            files: Vec::new(),
            cursor: 0,
            frame_count: 0,
        })
    }

    fn scan(dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read image directory {}", dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_image(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            matches!(
                ext.to_ascii_lowercase().as_str(),
                "png" | "jpg" | "jpeg"
            )
        })
        .unwrap_or(false)
}

impl FrameSource for ImageDirSource {
    fn name(&self) -> &'static str {
        "image-dir"
    }

    fn connect(&mut self) -> Result<()> {
        self.files = Self::scan(&self.dir)?;
        self.cursor = 0;
        log::info!(
            "ImageDirSource: connected to {} ({} images)",
            self.dir.display(),
            self.files.len()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        let image = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgb8();
        self.frame_count += 1;
        Ok(Some(RawFrame::from_image(image, self.frame_count)))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.dir.display().to_string(),
        }
    }
}
