use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgb, RgbImage};

use crate::detect::result::Detection;

const BOX_THICKNESS: u32 = 2;
const GLYPH_SIZE: u32 = 8;
const TAB_PADDING: u32 = 1;
const TAB_HEIGHT: u32 = GLYPH_SIZE + 2 * TAB_PADDING;
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

const PALETTE: [Rgb<u8>; 8] = [
    Rgb([0, 255, 0]),
    Rgb([255, 64, 64]),
    Rgb([64, 160, 255]),
    Rgb([255, 200, 0]),
    Rgb([255, 0, 255]),
    Rgb([0, 255, 255]),
    Rgb([255, 128, 0]),
    Rgb([160, 255, 160]),
];

/// Box color for a class label; stable across frames.
pub fn class_color(label: &str) -> Rgb<u8> {
    let sum = label.bytes().fold(0usize, |acc, b| acc + b as usize);
    PALETTE[sum % PALETTE.len()]
}

/// Draw a box and a `label 0.87` tab for every detection.
pub fn draw_detections(image: &mut RgbImage, detections: &[Detection]) {
    for det in detections {
        let color = class_color(&det.label);
        draw_rect(image, det.bbox, color, BOX_THICKNESS);
        draw_label(image, det, color);
    }
}

fn draw_rect(img: &mut RgbImage, bbox: [f32; 4], color: Rgb<u8>, thickness: u32) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let clamp = |v: f32, max: u32| -> u32 { v.max(0.0).min((max - 1) as f32) as u32 };
    let x0 = clamp(bbox[0], w);
    let y0 = clamp(bbox[1], h);
    let x1 = clamp(bbox[2], w);
    let y1 = clamp(bbox[3], h);

    for t in 0..thickness {
        let xx0 = x0 + t;
        let yy0 = y0 + t;
        let xx1 = x1.saturating_sub(t);
        let yy1 = y1.saturating_sub(t);
        if xx0 > xx1 || yy0 > yy1 {
            break;
        }
        for x in xx0..=xx1 {
            img.put_pixel(x, yy0, color);
            img.put_pixel(x, yy1, color);
        }
        for y in yy0..=yy1 {
            img.put_pixel(xx0, y, color);
            img.put_pixel(xx1, y, color);
        }
    }
}

fn draw_label(img: &mut RgbImage, det: &Detection, color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let text = format!("{} {:.2}", det.label, det.confidence);
    let tab_w = text.chars().count() as u32 * GLYPH_SIZE + 2 * TAB_PADDING;
    let x0 = (det.bbox[0].max(0.0) as u32).min(w - 1);
    // Above the box when there is room, otherwise inside it.
    let top = det.bbox[1].max(0.0) as u32;
    let y0 = top.checked_sub(TAB_HEIGHT).unwrap_or(top).min(h - 1);

    fill(img, x0, y0, tab_w, TAB_HEIGHT, color);
    let mut x = x0 + TAB_PADDING;
    for c in text.chars() {
        draw_glyph(img, x, y0 + TAB_PADDING, c);
        x += GLYPH_SIZE;
    }
}

fn fill(img: &mut RgbImage, x0: u32, y0: u32, width: u32, height: u32, color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    for y in y0..y0.saturating_add(height).min(h) {
        for x in x0..x0.saturating_add(width).min(w) {
            img.put_pixel(x, y, color);
        }
    }
}

/// 8x8 bitmap glyph; bit 0 of each row is the leftmost pixel.
fn draw_glyph(img: &mut RgbImage, x0: u32, y0: u32, c: char) {
    let Some(rows) = BASIC_FONTS.get(c) else {
        return;
    };
    let (w, h) = img.dimensions();
    for (dy, row) in rows.iter().enumerate() {
        for dx in 0..GLYPH_SIZE {
            if row & (1 << dx) == 0 {
                continue;
            }
            let (x, y) = (x0 + dx, y0 + dy as u32);
            if x < w && y < h {
                img.put_pixel(x, y, TEXT_COLOR);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACKGROUND: Rgb<u8> = Rgb([40, 40, 40]);

    fn count(img: &RgbImage, color: Rgb<u8>, rows: std::ops::Range<u32>) -> usize {
        rows.flat_map(|y| (0..img.width()).map(move |x| (x, y)))
            .filter(|&(x, y)| *img.get_pixel(x, y) == color)
            .count()
    }

    #[test]
    fn boxes_are_drawn_inside_the_image() {
        let mut img = RgbImage::from_pixel(120, 60, BACKGROUND);
        let det = Detection::new("person", 0.5, [10.0, 20.0, 30.0, 55.0]);
        draw_detections(&mut img, &[det]);

        let color = class_color("person");
        assert_eq!(img.get_pixel(10, 30), &color);
        assert_eq!(img.get_pixel(30, 55), &color);
        assert_eq!(img.get_pixel(20, 40), &BACKGROUND);
    }

    #[test]
    fn label_tab_carries_text_above_the_box() {
        let mut img = RgbImage::from_pixel(120, 60, BACKGROUND);
        let det = Detection::new("person", 0.87, [10.0, 20.0, 30.0, 55.0]);
        draw_detections(&mut img, &[det]);

        // "person 0.87" is 11 glyphs wide and sits in rows 10..20.
        let tab_rows = 10..20;
        assert!(count(&img, class_color("person"), tab_rows.clone()) > 0);
        assert!(count(&img, TEXT_COLOR, tab_rows) > 0);
        assert_eq!(img.get_pixel(10 + 11 * GLYPH_SIZE + 2, 15), &BACKGROUND);
        assert_eq!(count(&img, TEXT_COLOR, 0..10), 0);
    }

    #[test]
    fn classes_get_distinct_colors() {
        assert_ne!(class_color("person"), class_color("dog"));
        assert_eq!(class_color("person"), class_color("person"));
    }

    #[test]
    fn out_of_range_boxes_are_clamped() {
        let mut img = RgbImage::from_pixel(8, 8, BACKGROUND);
        let det = Detection::new("dog", 1.0, [-5.0, -5.0, 100.0, 100.0]);
        draw_detections(&mut img, &[det]);
        assert_eq!(count(&img, BACKGROUND, 0..8), 0);
    }
}
