use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Stub backend. Finds nothing, so the stage always reports a clear scene.
#[derive(Debug, Default)]
pub struct StubBackend {
    frames_seen: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.frames_seen += 1;
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backend_reports_nothing() {
        let mut backend = StubBackend::new();
        let frame = Frame::filled(4, 4, [0, 0, 0]);

        assert!(backend.detect(&frame).unwrap().is_empty());
        assert!(backend.detect(&frame).unwrap().is_empty());
        assert_eq!(backend.frames_seen(), 2);
    }
}
