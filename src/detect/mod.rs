//! Object detection.
//!
//! The detector is an opaque capability: given the square processed frame it
//! returns class indices and pixel-space boxes. Backends are selected once at
//! startup from the model path; the compute device is probed once and fixed
//! for the process lifetime.

mod backend;
mod backends;
mod device;
mod nms;
mod result;

use anyhow::{anyhow, Result};

use crate::config::ModelSettings;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use device::{ComputeDevice, DeviceCapabilities, DevicePreference};
pub use nms::{iou, non_max_suppression};
pub use result::RawDetection;

/// Open the backend named by `settings.path`.
///
/// `stub://` selects the built-in stub (no detections), optionally with
/// `?classes=N` to report an N-class model; any other path is an ONNX model
/// file and requires the `backend-tract` feature.
pub fn open_backend(
    settings: &ModelSettings,
    device: ComputeDevice,
) -> Result<Box<dyn DetectorBackend>> {
    if let Some(rest) = settings.path.strip_prefix("stub://") {
        return Ok(Box::new(stub_from_uri(rest)?));
    }
    open_model(settings, device)
}

fn stub_from_uri(rest: &str) -> Result<StubBackend> {
    let (_, query) = rest.split_once('?').unwrap_or((rest, ""));
    let mut backend = StubBackend::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        match pair.split_once('=') {
            Some(("classes", value)) => {
                let count = value.parse().map_err(|_| {
                    anyhow!("stub model parameter 'classes' must be an integer, got '{}'", value)
                })?;
                backend = backend.with_class_count(count);
            }
            _ => return Err(anyhow!("unknown stub model parameter '{}'", pair)),
        }
    }
    Ok(backend)
}

#[cfg(feature = "backend-tract")]
fn open_model(settings: &ModelSettings, device: ComputeDevice) -> Result<Box<dyn DetectorBackend>> {
    let backend = TractBackend::new(&settings.path, settings.input_size, device)?
        .with_thresholds(settings.confidence, settings.iou);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn open_model(settings: &ModelSettings, _device: ComputeDevice) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "model {} requires the backend-tract feature",
        settings.path
    ))
}
