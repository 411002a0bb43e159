use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;

/// Stub backend for tests and headless demos.
///
/// Each call returns the next scripted result when one is queued, otherwise
/// the fixed detection list (empty by default), or an error when the stub
/// was built to fail on every unscripted frame.
#[derive(Default)]
pub struct StubBackend {
    fixed: Vec<RawDetection>,
    script: VecDeque<Result<Vec<RawDetection>, String>>,
    class_count: Option<usize>,
    failing: Option<String>,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `detections` for every frame without a scripted result.
    pub fn with_detections(mut self, detections: Vec<RawDetection>) -> Self {
        self.fixed = detections;
        self
    }

    /// Queue the result for the next unscripted frame.
    pub fn push_result(mut self, detections: Vec<RawDetection>) -> Self {
        self.script.push_back(Ok(detections));
        self
    }

    /// Queue an inference failure for the next unscripted frame.
    pub fn push_failure(mut self, message: &str) -> Self {
        self.script.push_back(Err(message.to_string()));
        self
    }

    /// Fail every unscripted frame with `message`.
    pub fn failing(mut self, message: &str) -> Self {
        self.failing = Some(message.to_string());
        self
    }

    /// Report a model with `count` classes to the startup coverage check.
    pub fn with_class_count(mut self, count: usize) -> Self {
        self.class_count = Some(count);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(Ok(detections)) => Ok(detections),
            Some(Err(message)) => Err(anyhow!(message)),
            None => match &self.failing {
                Some(message) => Err(anyhow!(message.clone())),
                None => Ok(self.fixed.clone()),
            },
        }
    }

    fn class_count(&self) -> Option<usize> {
        self.class_count
    }
}
