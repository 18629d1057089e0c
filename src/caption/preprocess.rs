use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use serde::Deserialize;

use crate::frame::Frame;

/// Channel order a model expects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Input geometry and normalization of an image model.
#[derive(Clone, Debug)]
pub struct InputSpec {
    pub width: u32,
    pub height: u32,
    pub order: ChannelOrder,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl InputSpec {
    /// BLIP image processor defaults (CLIP statistics, 384x384).
    pub fn blip() -> Self {
        Self {
            width: 384,
            height: 384,
            order: ChannelOrder::Rgb,
            mean: [0.481_454_66, 0.457_827_5, 0.408_210_73],
            std: [0.268_629_54, 0.261_302_58, 0.275_777_11],
        }
    }

    /// Plain `[0, 1]` scaling, no mean/std shift.
    pub fn unit(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            order: ChannelOrder::Rgb,
            mean: [0.0; 3],
            std: [1.0; 3],
        }
    }
}

/// Resize and normalize a frame into a CHW `f32` buffer of length `3*h*w`.
pub fn to_chw(frame: &Frame, spec: &InputSpec) -> Result<Vec<f32>> {
    if spec.width == 0 || spec.height == 0 {
        return Err(anyhow!("model input size must be non-zero"));
    }
    if spec.std.iter().any(|s| *s == 0.0) {
        return Err(anyhow!("normalization std must be non-zero"));
    }

    let resized;
    let image = if frame.width() == spec.width && frame.height() == spec.height {
        frame.image()
    } else {
        resized = imageops::resize(frame.image(), spec.width, spec.height, FilterType::Triangle);
        &resized
    };

    let plane = (spec.width as usize) * (spec.height as usize);
    let mut out = vec![0f32; plane * 3];
    for (i, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            let source = match spec.order {
                ChannelOrder::Rgb => c,
                ChannelOrder::Bgr => 2 - c,
            };
            let value = pixel.0[source] as f32 / 255.0;
            out[c * plane + i] = (value - spec.mean[c]) / spec.std[c];
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_planar_and_sized_to_model() -> Result<()> {
        let frame = Frame::filled(64, 48, [255, 0, 0]);
        let out = to_chw(&frame, &InputSpec::unit(8, 4))?;

        assert_eq!(out.len(), 3 * 8 * 4);
        assert!(out[..32].iter().all(|v| (*v - 1.0).abs() < 0.01));
        assert!(out[32..].iter().all(|v| v.abs() < 0.01));
        Ok(())
    }

    #[test]
    fn bgr_order_swaps_planes() -> Result<()> {
        let frame = Frame::filled(2, 2, [255, 0, 0]);
        let mut spec = InputSpec::unit(2, 2);
        spec.order = ChannelOrder::Bgr;
        let out = to_chw(&frame, &spec)?;

        assert!(out[..4].iter().all(|v| v.abs() < 1e-6));
        assert!(out[8..].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn mean_and_std_are_applied() -> Result<()> {
        let frame = Frame::filled(1, 1, [0, 0, 0]);
        let spec = InputSpec::blip();
        let out = to_chw(&frame, &InputSpec { width: 1, height: 1, ..spec.clone() })?;
        let expected = -spec.mean[0] / spec.std[0];
        assert!((out[0] - expected).abs() < 1e-5);
        Ok(())
    }
}
