//! In-memory frames.
//!
//! - `Frame`: owned RGB raster (width x height x 3, 8-bit channels).
//! - JPEG encoding for the stream, snapshots and alert attachments.
//!
//! Frames are ephemeral. Whoever is processing a frame owns it briefly; any
//! stage that needs to keep a frame past the producer's next `read()` must
//! take its own copy (`Clone` is a deep copy of the pixel buffer).

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};
use std::time::{Duration, Instant};

/// Default JPEG quality used for the video stream.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

// ----------------------------------------------------------------------------
// Frame: owned RGB raster
// ----------------------------------------------------------------------------

/// Owned RGB frame.
///
/// `Clone` copies the whole pixel buffer, so a clone never aliases the
/// producer's buffer.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    captured_at: Instant,
}

impl Frame {
    /// Build a frame from packed RGB24 bytes.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", width, height))?;
        Ok(Self::from_image(image))
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
        }
    }

    /// Solid-color frame. Mostly useful for tests and synthetic sources.
    pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        Self::from_image(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Packed RGB24 pixel bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Time since the source produced this frame.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Encode as baseline JPEG.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.pixels().len() / 8);
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .write_image(
                self.pixels(),
                self.width(),
                self.height(),
                ExtendedColorType::Rgb8,
            )
            .context("encode frame as JPEG")?;
        Ok(out)
    }

    /// Decode a JPEG (or any format the `image` build supports) into a frame.
    pub fn decode_jpeg(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes).context("decode JPEG frame")?;
        Ok(Self::from_image(decoded.to_rgb8()))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
