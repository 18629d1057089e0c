//! V4L2 capture for real camera devices.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_frame, PixelFormat};
use crate::frame::Frame;

/// Preferred formats, best first. RGB3 needs no conversion.
const PREFERRED_FOURCC: [&[u8; 4]; 3] = [b"RGB3", b"YUYV", b"MJPG"];

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

/// One opened V4L2 device with an mmap capture stream.
pub(crate) struct V4l2Device {
    path: String,
    state: DeviceState,
    format: PixelFormat,
    width: u32,
    height: u32,
}

impl V4l2Device {
    pub(crate) fn open(path: &str, width: u32, height: u32, target_fps: u32) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device =
            v4l::Device::with_path(path).with_context(|| format!("open v4l2 device {}", path))?;

        let mut negotiated = None;
        for fourcc in PREFERRED_FOURCC {
            let mut format = device.format().context("read v4l2 format")?;
            format.width = width;
            format.height = height;
            format.fourcc = v4l::FourCC::new(fourcc);
            match device.set_format(&format) {
                Ok(actual) if &actual.fourcc.repr == fourcc => {
                    negotiated = Some(actual);
                    break;
                }
                Ok(_) => continue,
                Err(err) => {
                    log::debug!(
                        "V4l2Device: {} rejected {}: {}",
                        path,
                        String::from_utf8_lossy(fourcc),
                        err
                    );
                }
            }
        }
        let format = negotiated
            .ok_or_else(|| anyhow!("{} supports none of RGB3, YUYV, MJPG", path))?;
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr)
            .ok_or_else(|| anyhow!("unsupported fourcc {}", format.fourcc))?;

        if target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Device: failed to set fps on {}: {}", path, err);
            }
        }

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Device: opened {} ({}x{} {})",
            path,
            format.width,
            format.height,
            format.fourcc
        );
        Ok(Self {
            path: path.to_string(),
            state,
            format: pixel_format,
            width: format.width,
            height: format.height,
        })
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    /// Next frame. A buffer that fails to convert is a transient miss.
    pub(crate) fn read(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.width, self.height, self.format);
        let converted = self.state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, _meta)| normalize_to_frame(buf, width, height, format))
        });
        match converted.with_context(|| format!("capture v4l2 frame from {}", self.path))? {
            Ok(frame) => Ok(Some(frame)),
            Err(err) => {
                log::debug!("V4l2Device: dropped bad buffer from {}: {:#}", self.path, err);
                Ok(None)
            }
        }
    }
}
