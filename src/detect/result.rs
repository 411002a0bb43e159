/// One object found by a backend.
///
/// `bbox` is `[x_min, y_min, x_max, y_max]` in processed-frame pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub bbox: [f32; 4],
    pub confidence: f32,
}

impl RawDetection {
    pub fn new(class_id: usize, bbox: [f32; 4], confidence: f32) -> Self {
        Self {
            class_id,
            bbox,
            confidence,
        }
    }
}
