/// One object found in a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// Class name, e.g. `person`.
    pub label: String,
    pub confidence: f32,
    /// Corner box `[x1, y1, x2, y2]` in frame pixels.
    pub bbox: [f32; 4],
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: [f32; 4]) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    pub fn area(&self) -> f32 {
        (self.bbox[2] - self.bbox[0]).max(0.0) * (self.bbox[3] - self.bbox[1]).max(0.0)
    }
}

/// Result of one pass of the detection stage.
#[derive(Clone, Debug)]
pub struct DetectionOutcome {
    /// Frame with boxes drawn, or the input frame on pass-through.
    pub frame: crate::frame::Frame,
    /// A qualifying subject was found.
    pub detected: bool,
    /// Human-readable description of the match; empty when nothing matched.
    pub detail: String,
    pub detections: Vec<Detection>,
}

impl DetectionOutcome {
    pub fn pass_through(frame: crate::frame::Frame) -> Self {
        Self {
            frame,
            detected: false,
            detail: String::new(),
            detections: Vec::new(),
        }
    }
}
