use anyhow::Result;
use image::RgbImage;

use crate::detect::result::RawDetection;

/// Detector backend trait.
///
/// `detect` receives the square processed frame and returns detections in
/// that frame's pixel space, in the order the model produced them. Backends
/// must not retain the image beyond the call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one processed frame.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>>;

    /// Number of classes the model can emit, when known.
    ///
    /// Used at startup to check the class name table is large enough.
    fn class_count(&self) -> Option<usize> {
        None
    }

    /// Optional warm-up hook, run once before the first session.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
