//! Camera frame source.
//!
//! Tries each configured device in order and keeps the first that opens.
//! `stub://` devices produce synthetic frames; anything else is a V4L2 device
//! node (feature `ingest-v4l2`).

use anyhow::{anyhow, Result};

use super::synthetic::SyntheticScene;
#[cfg(feature = "ingest-v4l2")]
use super::v4l2::V4l2Device;
use super::FrameSource;
use crate::config::CameraSettings;
use crate::frame::Frame;

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Devices in fallback order, e.g. `/dev/video0`, `/dev/video1`.
    pub devices: Vec<String>,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            devices: vec!["/dev/video0".to_string(), "/dev/video1".to_string()],
            target_fps: 15,
            width: 640,
            height: 480,
        }
    }
}

impl From<&CameraSettings> for CameraConfig {
    fn from(settings: &CameraSettings) -> Self {
        Self {
            devices: settings.devices.clone(),
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
        }
    }
}

enum CameraBackend {
    Synthetic {
        device: String,
        scene: SyntheticScene,
    },
    #[cfg(feature = "ingest-v4l2")]
    Device(V4l2Device),
}

pub struct CameraSource {
    config: CameraConfig,
    backend: Option<CameraBackend>,
    frames_read: u64,
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.devices.is_empty() {
            return Err(anyhow!("camera source needs at least one device"));
        }
        Ok(Self {
            config,
            backend: None,
            frames_read: 0,
        })
    }

    /// Device currently in use.
    pub fn active_device(&self) -> Option<&str> {
        match self.backend.as_ref()? {
            CameraBackend::Synthetic { device, .. } => Some(device),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(device) => Some(device.path()),
        }
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    fn open_device(&self, device: &str) -> Result<CameraBackend> {
        if device.starts_with("stub://") {
            return Ok(CameraBackend::Synthetic {
                device: device.to_string(),
                scene: SyntheticScene::new(self.config.width, self.config.height),
            });
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(CameraBackend::Device(V4l2Device::open(
                device,
                self.config.width,
                self.config.height,
                self.config.target_fps,
            )?))
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(anyhow!(
                "camera device {} requires the ingest-v4l2 feature",
                device
            ))
        }
    }
}

impl FrameSource for CameraSource {
    fn open(&mut self) -> Result<()> {
        self.close();
        let mut failures = Vec::new();
        for device in &self.config.devices {
            match self.open_device(device) {
                Ok(backend) => {
                    log::info!("CameraSource: using {}", device);
                    self.backend = Some(backend);
                    return Ok(());
                }
                Err(err) => {
                    log::warn!("CameraSource: {} unavailable: {:#}", device, err);
                    failures.push(format!("{}: {:#}", device, err));
                }
            }
        }
        Err(anyhow!("no camera could be opened ({})", failures.join("; ")))
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        let frame = match self.backend.as_mut() {
            None => return Err(anyhow!("camera source is not open")),
            Some(CameraBackend::Synthetic { scene, .. }) => Some(scene.next_frame()),
            #[cfg(feature = "ingest-v4l2")]
            Some(CameraBackend::Device(device)) => device.read()?,
        };
        if frame.is_some() {
            self.frames_read += 1;
        }
        Ok(frame)
    }

    fn close(&mut self) {
        if self.backend.take().is_some() {
            log::debug!("CameraSource: closed");
        }
    }

    fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    fn describe(&self) -> String {
        match self.active_device() {
            Some(device) => format!("camera {}", device),
            None => "camera (closed)".to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(devices: &[&str]) -> CameraConfig {
        CameraConfig {
            devices: devices.iter().map(|d| d.to_string()).collect(),
            target_fps: 10,
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn camera_source_produces_frames() -> Result<()> {
        let mut source = CameraSource::new(stub_config(&["stub://cam0"]))?;
        source.open()?;

        let frame = source.read()?.expect("synthetic camera always has a frame");
        assert_eq!((frame.width(), frame.height()), (64, 48));
        assert_eq!(source.frames_read(), 1);
        Ok(())
    }

    #[test]
    fn falls_back_to_next_device() -> Result<()> {
        let mut source = CameraSource::new(stub_config(&["/nonexistent/video9", "stub://cam1"]))?;
        source.open()?;
        assert_eq!(source.active_device(), Some("stub://cam1"));
        Ok(())
    }

    #[test]
    fn read_before_open_is_an_error() -> Result<()> {
        let mut source = CameraSource::new(stub_config(&["stub://cam0"]))?;
        assert!(source.read().is_err());
        source.open()?;
        source.close();
        assert!(!source.is_open());
        assert!(source.read().is_err());
        Ok(())
    }

    #[test]
    fn open_fails_when_no_device_works() -> Result<()> {
        let mut source = CameraSource::new(stub_config(&["/nonexistent/video9"]))?;
        assert!(source.open().is_err());
        Ok(())
    }
}
