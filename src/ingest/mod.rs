//! Frame sources.
//!
//! - `CameraSource`: first working device from a fallback list
//!   (V4L2 with feature `ingest-v4l2`, or `stub://` synthetic)
//! - `FileSource`: local video file, looped
//!   (FFmpeg with feature `ingest-file-ffmpeg`, or `stub://` synthetic)
//!
//! Sources never write frames to disk and never log pixel content.

use anyhow::Result;

use crate::frame::Frame;

mod camera;
pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

pub use camera::{CameraConfig, CameraSource};
pub use file::FileSource;

/// A camera or file producing RGB frames on demand.
///
/// Not `Send`: device handles stay on the capture thread that built them.
pub trait FrameSource {
    /// Acquire the underlying device or file. Re-opening an open source
    /// closes it first.
    fn open(&mut self) -> Result<()>;

    /// Next frame.
    ///
    /// `Ok(None)` is a transient miss: skip this cycle. `Err` means the source
    /// is unusable until re-opened.
    fn read(&mut self) -> Result<Option<Frame>>;

    /// Release the device or file. Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Short label for logs and status output.
    fn describe(&self) -> String;
}
