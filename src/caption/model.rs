use anyhow::Result;

use crate::frame::Frame;

/// Image-to-text model driven by the caption worker.
///
/// The worker owns its model and calls it from its own thread only, one frame
/// at a time, so implementations need `Send` but not `Sync`.
pub trait CaptionModel: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Device the model runs on, shown in the start-up placeholder.
    fn device(&self) -> &str {
        "cpu"
    }

    /// Produce one caption for a frame.
    ///
    /// Implementations resize and normalize the frame to their own input
    /// geometry. The returned text has special tokens stripped; the worker
    /// trims it and treats an empty caption as a failure.
    fn caption(&mut self, frame: &Frame) -> Result<String>;

    /// Optional warm-up hook, run on the worker thread before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<M: CaptionModel + ?Sized> CaptionModel for Box<M> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn device(&self) -> &str {
        (**self).device()
    }

    fn caption(&mut self, frame: &Frame) -> Result<String> {
        (**self).caption(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
