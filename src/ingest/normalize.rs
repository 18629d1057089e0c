use anyhow::{anyhow, Result};

use crate::frame::Frame;

/// Capture formats accepted from V4L2 devices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    Mjpeg,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            _ => None,
        }
    }
}

pub(crate) fn normalize_to_frame(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Frame> {
    match format {
        PixelFormat::Rgb24 => {
            let expected = width
                .checked_mul(height)
                .and_then(|v| v.checked_mul(3))
                .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))? as usize;
            // Drivers may hand out buffers larger than the image.
            let data = pixels.get(..expected).ok_or_else(|| {
                anyhow!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                )
            })?;
            Frame::from_rgb(width, height, data.to_vec())
        }
        PixelFormat::Yuyv => Frame::from_rgb(width, height, yuyv_to_rgb(pixels, width, height)?),
        PixelFormat::Mjpeg => Frame::decode_jpeg(pixels),
    }
}

fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    if w % 2 != 0 {
        return Err(anyhow!("YUYV frame width must be even, got {}", w));
    }
    let expected = w
        .checked_mul(h)
        .and_then(|v| v.checked_mul(2))
        .ok_or_else(|| anyhow!("YUYV frame dimensions overflow"))?;
    let data = pixels.get(..expected).ok_or_else(|| {
        anyhow!(
            "YUYV frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        )
    })?;

    let mut rgb = Vec::with_capacity(w * h * 3);
    // Each 4-byte group holds two pixels sharing one U/V pair.
    for group in data.chunks_exact(4) {
        let u = group[1] as f32 - 128.0;
        let v = group[3] as f32 - 128.0;
        for y in [group[0] as f32, group[2] as f32] {
            rgb.push(clamp_to_u8(y + 1.402_f32 * v));
            rgb.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }
    Ok(rgb)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_conversion_produces_gray() -> Result<()> {
        let yuyv = vec![128u8; 2 * 2 * 2];
        let frame = normalize_to_frame(&yuyv, 2, 2, PixelFormat::Yuyv)?;
        assert_eq!(frame.pixels(), &[128u8; 12][..]);
        Ok(())
    }

    #[test]
    fn rgb_pass_through_validates_length() -> Result<()> {
        let pixels = vec![1u8; 9];
        let frame = normalize_to_frame(&pixels, 1, 3, PixelFormat::Rgb24)?;
        assert_eq!(frame.pixels(), &pixels[..]);
        assert!(normalize_to_frame(&pixels[..8], 1, 3, PixelFormat::Rgb24).is_err());
        Ok(())
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), Some(PixelFormat::Mjpeg));
        assert_eq!(PixelFormat::from_fourcc(b"NV12"), None);
    }
}
