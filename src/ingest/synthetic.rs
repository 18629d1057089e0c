use rand::Rng;

use crate::frame::Frame;

/// Base colors the synthetic scene cycles through.
const PALETTE: [[u8; 3]; 4] = [[40, 60, 160], [170, 50, 40], [50, 150, 60], [200, 190, 60]];

/// Frames between two palette changes.
const SCENE_LENGTH: u64 = 50;

/// Generated scene for `stub://` sources: a tinted gradient with a block that
/// drifts across it, a little per-row noise, and a palette change every
/// `SCENE_LENGTH` frames.
pub(crate) struct SyntheticScene {
    width: u32,
    height: u32,
    frame_count: u64,
}

impl SyntheticScene {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_count: 0,
        }
    }

    pub(crate) fn frames_generated(&self) -> u64 {
        self.frame_count
    }

    pub(crate) fn next_frame(&mut self) -> Frame {
        let scene = (self.frame_count / SCENE_LENGTH) as usize;
        let base = PALETTE[scene % PALETTE.len()];
        self.frame_count += 1;

        let (w, h) = (self.width.max(1), self.height.max(1));
        let block = (w.min(h) / 4).max(1);
        let block_x = ((self.frame_count * 4) % w as u64) as u32;
        let block_y = h / 2 - block.min(h / 2) / 2;

        let mut rng = rand::thread_rng();
        let mut pixels = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            let noise: i16 = rng.gen_range(-6..=6);
            let shade = (y * 60 / h) as i16;
            for x in 0..w {
                let in_block = x >= block_x && x < block_x + block && y >= block_y && y < block_y + block;
                if in_block {
                    pixels.extend_from_slice(&[235, 235, 235]);
                    continue;
                }
                for c in base {
                    pixels.push((c as i16 + shade + noise - 30).clamp(0, 255) as u8);
                }
            }
        }

        match Frame::from_rgb(w, h, pixels) {
            Ok(frame) => frame,
            // Length is computed from the same dimensions above.
            Err(_) => Frame::filled(w, h, base),
        }
    }
}
