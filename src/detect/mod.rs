//! Person detection for the security mode.

mod annotate;
mod backend;
pub mod backends;
mod result;
mod stage;
pub mod yolo;

pub use annotate::draw_detections;
pub use backend::DetectorBackend;
pub use backends::StubBackend;
pub use result::{Detection, DetectionOutcome};
pub use stage::{DetectionStage, SecurityStatus};
