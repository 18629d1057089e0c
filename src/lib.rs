//! livecap: live webcam captioning with person alerts.
//!
//! # Architecture
//!
//! One capture thread pulls frames from a camera or video file and fans each
//! frame out:
//!
//! 1. **Captioning**: the frame is offered to a background worker through a
//!    capacity-1 hand-off slot. The capture loop never waits on inference; a
//!    frame arriving while the worker is busy is dropped.
//! 2. **Security** (optional): a detector runs inline, boxes are drawn on the
//!    displayed frame, and a person above the confidence bar triggers an
//!    email alert, at most one per cooldown window.
//! 3. **Streaming**: the displayed frame is JPEG-encoded and published to a
//!    latest-value hub read by every `/video_feed` client.
//!
//! # Module Structure
//!
//! - `frame`: owned RGB frames and JPEG encoding
//! - `ingest`: camera and file frame sources
//! - `caption`: hand-off slot, caption worker, model backends
//! - `detect`: detector backends, annotation, detection stage
//! - `alert`: alert sinks and cooldown
//! - `stream`: capture loop and frame hub
//! - `context`: process-wide state
//! - `api`: HTTP routes
//! - `speech`: translation and text-to-speech
//! - `config`: file and environment configuration

pub mod alert;
pub mod api;
pub mod caption;
pub mod config;
pub mod context;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod speech;
pub mod stream;
mod unwind;

pub use alert::{AlertDeclined, AlertOutcome, AlertSink, EmailAlertSink, EmailSettings};
pub use caption::{CaptionModel, CaptionWorker, HandoffSlot, Offer};
pub use config::LivecapConfig;
pub use context::{AppContext, SourceSpec};
pub use detect::{Detection, DetectionOutcome, DetectionStage, DetectorBackend};
pub use frame::Frame;
pub use ingest::{CameraSource, FileSource, FrameSource};
pub use stream::{FrameHub, StreamAssembler};
