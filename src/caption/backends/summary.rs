use anyhow::{anyhow, Result};

use crate::caption::model::CaptionModel;
use crate::frame::Frame;

/// Built-in captioner that describes exposure and dominant color.
///
/// Needs no model files, so the service runs end to end on any machine.
#[derive(Debug, Default)]
pub struct SceneSummaryModel {
    _private: (),
}

impl SceneSummaryModel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptionModel for SceneSummaryModel {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn caption(&mut self, frame: &Frame) -> Result<String> {
        let pixels = frame.pixels();
        if pixels.is_empty() {
            return Err(anyhow!("frame has no pixels"));
        }

        let mut sums = [0u64; 3];
        let mut count = 0u64;
        // Every 4th pixel is plenty for a mean.
        for px in pixels.chunks_exact(3).step_by(4) {
            sums[0] += px[0] as u64;
            sums[1] += px[1] as u64;
            sums[2] += px[2] as u64;
            count += 1;
        }
        let mean = [
            sums[0] as f32 / count as f32,
            sums[1] as f32 / count as f32,
            sums[2] as f32 / count as f32,
        ];
        let luma = 0.299 * mean[0] + 0.587 * mean[1] + 0.114 * mean[2];

        Ok(format!("a {} scene {}", exposure(luma), palette(mean)))
    }
}

fn exposure(luma: f32) -> &'static str {
    match luma {
        l if l < 50.0 => "dark",
        l if l < 110.0 => "dim",
        l if l < 180.0 => "well lit",
        _ => "bright",
    }
}

fn palette(mean: [f32; 3]) -> &'static str {
    let max = mean.iter().copied().fold(f32::MIN, f32::max);
    let min = mean.iter().copied().fold(f32::MAX, f32::min);
    if max - min < 20.0 {
        return "in neutral gray tones";
    }
    let [r, g, b] = mean;
    if r > b + 20.0 && g > b + 20.0 && (r - g).abs() < 30.0 {
        "dominated by yellow tones"
    } else if r >= g && r >= b {
        "dominated by red tones"
    } else if g >= r && g >= b {
        "dominated by green tones"
    } else {
        "dominated by blue tones"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_exposure_and_color() -> Result<()> {
        let mut model = SceneSummaryModel::new();
        assert_eq!(
            model.caption(&Frame::filled(8, 8, [10, 10, 90]))?,
            "a dark scene dominated by blue tones"
        );
        assert_eq!(
            model.caption(&Frame::filled(8, 8, [230, 230, 230]))?,
            "a bright scene in neutral gray tones"
        );
        assert_eq!(
            model.caption(&Frame::filled(8, 8, [40, 200, 40]))?,
            "a well lit scene dominated by green tones"
        );
        Ok(())
    }
}
