#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::device::ComputeDevice;
use crate::detect::nms::non_max_suppression;
use crate::detect::result::RawDetection;

const MAX_DETECTIONS: usize = 300;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// The model takes `[1, 3, S, S]` RGB in `0..1` and produces one head of
/// shape `[1, 4 + classes, anchors]` (or its transpose) holding center-format
/// boxes followed by per-class scores. Boxes are scaled back to the size of
/// the processed frame handed to `detect`.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
    class_count: Option<usize>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32, device: ComputeDevice) -> Result<Self> {
        let model_path = model_path.as_ref();
        if device != ComputeDevice::Cpu {
            log::info!(
                "TractBackend: {} selected, tract executes on the host CPU",
                device
            );
        }
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            class_count: None,
        })
    }

    /// Override the default confidence and IoU thresholds.
    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let side = self.input_size;
        let resized;
        let source = if image.dimensions() == (side, side) {
            image
        } else {
            resized = imageops::resize(image, side, side, FilterType::Triangle);
            &resized
        };
        let side = side as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            source.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn decode(&mut self, outputs: TVec<TValue>, frame_size: u32) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let head = HeadDecoder {
            input_size: self.input_size,
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
        };
        let (detections, class_count) = head.decode(view, frame_size)?;
        self.class_count = Some(class_count);
        Ok(detections)
    }
}

/// Turns one raw YOLO head into suppressed detections.
#[derive(Clone, Copy, Debug)]
struct HeadDecoder {
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl HeadDecoder {
    /// Decode `view` and scale boxes to a `frame_size` square.
    ///
    /// Returns the detections and the number of classes the head carries.
    fn decode(
        &self,
        view: tract_ndarray::ArrayViewD<'_, f32>,
        frame_size: u32,
    ) -> Result<(Vec<RawDetection>, usize)> {
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected detector output shape {:?}", shape));
        }
        // Channels-first heads have far fewer channels than anchors.
        let channels_first = shape[1] < shape[2];
        let (channels, anchors) = if channels_first {
            (shape[1], shape[2])
        } else {
            (shape[2], shape[1])
        };
        if channels < 5 {
            return Err(anyhow!(
                "detector output needs at least 5 channels, got {}",
                channels
            ));
        }

        let at = |channel: usize, anchor: usize| {
            if channels_first {
                view[&[0, channel, anchor][..]]
            } else {
                view[&[0, anchor, channel][..]]
            }
        };

        let scale = frame_size as f32 / self.input_size as f32;
        let limit = frame_size.saturating_sub(1) as f32;
        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let (class_id, score) = (4..channels)
                .map(|c| (c - 4, at(c, anchor)))
                .fold((0, f32::NEG_INFINITY), |best, next| {
                    if next.1 > best.1 {
                        next
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < self.confidence_threshold {
                continue;
            }
            let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
            let bbox = [
                ((cx - w / 2.0) * scale).clamp(0.0, limit),
                ((cy - h / 2.0) * scale).clamp(0.0, limit),
                ((cx + w / 2.0) * scale).clamp(0.0, limit),
                ((cy + h / 2.0) * scale).clamp(0.0, limit),
            ];
            candidates.push(RawDetection::new(class_id, bbox, score));
        }

        let detections = non_max_suppression(candidates, self.iou_threshold, MAX_DETECTIONS);
        Ok((detections, channels - 4))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        if image.width() != image.height() {
            return Err(anyhow!(
                "detector expects a square frame, got {}x{}",
                image.width(),
                image.height()
            ));
        }
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, image.width())
    }

    fn class_count(&self) -> Option<usize> {
        self.class_count
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.detect(&blank).context("detector warm-up failed")?;
        Ok(())
    }
}
