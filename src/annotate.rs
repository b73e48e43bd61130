//! Frame resizing, overlays and JPEG encoding.
//!
//! Text is drawn with a built-in 5x7 bitmap font so no font files need to
//! ship with the daemon. Glyphs cover A-Z, 0-9 and the punctuation the
//! overlays use; anything else renders as a blank cell.

use anyhow::{anyhow, Result};
use chrono::{NaiveTime, Timelike};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detect::Detection;

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: i32 = 2;
const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const GLYPH_ADVANCE: i32 = 6;
const TEXT_SCALE: i32 = 2;

const PLACEHOLDER_WIDTH: u32 = 640;
const PLACEHOLDER_HEIGHT: u32 = 360;
const PLACEHOLDER_TEXT: &str = "SURVEILLANCE IDLE";

/// Resize to `width` keeping the aspect ratio (bilinear).
///
/// Images that already have the requested width are returned as a copy.
pub fn resize_to_width(image: &RgbImage, width: u32) -> RgbImage {
    if width == 0 || image.width() == width || image.width() == 0 {
        return image.clone();
    }
    let ratio = width as f64 / image.width() as f64;
    let height = ((image.height() as f64 * ratio).round() as u32).max(1);
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Draw a labelled box for one detection.
pub fn draw_detection(image: &mut RgbImage, detection: &Detection) {
    if image.width() == 0 || image.height() == 0 {
        return;
    }
    let bbox = detection.bbox.clamped(image.width(), image.height());
    let left = bbox.x1.round() as i32;
    let top = bbox.y1.round() as i32;
    let right = bbox.x2.round() as i32;
    let bottom = bbox.y2.round() as i32;

    for inset in 0..BOX_THICKNESS {
        let width = right - left - 2 * inset + 1;
        let height = bottom - top - 2 * inset + 1;
        if width <= 0 || height <= 0 {
            break;
        }
        let rect = Rect::at(left + inset, top + inset).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }

    let label = format!(
        "{} {:.0}%",
        detection.class_name,
        (detection.confidence * 100.0).clamp(0.0, 100.0)
    );
    let label_height = GLYPH_HEIGHT * TEXT_SCALE;
    let label_y = if top - label_height - 4 >= 0 {
        top - label_height - 4
    } else {
        top + BOX_THICKNESS + 2
    };
    draw_text_with_background(image, left, label_y, &label, BOX_COLOR);
}

/// Draw `TIME: HH:MM:SS` in the bottom-left corner.
pub fn draw_timestamp(image: &mut RgbImage, time: NaiveTime) {
    let text = format!(
        "TIME: {:02}:{:02}:{:02}",
        time.hour(),
        time.minute(),
        time.second()
    );
    let y = image.height() as i32 - GLYPH_HEIGHT * TEXT_SCALE - 10;
    draw_text_with_background(image, 10, y.max(0), &text, TEXT_COLOR);
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

/// The card shown to viewers while no session is emitting frames.
pub fn placeholder_image() -> RgbImage {
    let mut image = RgbImage::from_pixel(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, Rgb([32, 32, 32]));
    let text_width = text_width(PLACEHOLDER_TEXT);
    let x = (PLACEHOLDER_WIDTH as i32 - text_width) / 2;
    let y = (PLACEHOLDER_HEIGHT as i32 - GLYPH_HEIGHT * TEXT_SCALE) / 2;
    draw_text(&mut image, x, y, PLACEHOLDER_TEXT, TEXT_COLOR);
    image
}

pub fn placeholder_jpeg(quality: u8) -> Result<Vec<u8>> {
    encode_jpeg(&placeholder_image(), quality)
}

fn text_width(text: &str) -> i32 {
    text.chars().count() as i32 * GLYPH_ADVANCE * TEXT_SCALE
}

fn draw_text_with_background(image: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    fill_rect(
        image,
        x - 2,
        y - 2,
        x + text_width(text),
        y + GLYPH_HEIGHT * TEXT_SCALE + 1,
        LABEL_BACKGROUND,
    );
    draw_text(image, x, y, text, color);
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_text(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    for dy in 0..TEXT_SCALE {
                        for dx in 0..TEXT_SCALE {
                            let px = x + col * TEXT_SCALE + dx;
                            let py = y + row as i32 * TEXT_SCALE + dy;
                            if px >= 0 && px < width && py >= 0 && py < height {
                                image.put_pixel(px as u32, py as u32, color);
                            }
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE * TEXT_SCALE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '!' => [0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0, 0b00100],
        '/' => [0b00001, 0b00010, 0b00010, 0b00100, 0b01000, 0b01000, 0b10000],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(bits)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    #[test]
    fn resize_preserves_aspect_ratio() {
        let image = RgbImage::new(1280, 720);
        let resized = resize_to_width(&image, 640);
        assert_eq!(resized.dimensions(), (640, 360));
    }

    #[test]
    fn resize_to_same_width_is_a_copy() {
        let image = RgbImage::from_pixel(640, 480, Rgb([9, 9, 9]));
        let resized = resize_to_width(&image, 640);
        assert_eq!(resized, image);
    }

    #[test]
    fn detection_box_is_green() {
        let mut image = RgbImage::new(200, 200);
        let detection = Detection::new(0, 0.9, BoundingBox::new(50.0, 60.0, 150.0, 180.0));
        draw_detection(&mut image, &detection);

        assert_eq!(image.get_pixel(50, 100), &BOX_COLOR);
        assert_eq!(image.get_pixel(51, 100), &BOX_COLOR);
        assert_eq!(image.get_pixel(150, 100), &BOX_COLOR);
        // Interior is untouched.
        assert_eq!(image.get_pixel(100, 120), &Rgb([0, 0, 0]));
    }

    #[test]
    fn boxes_touching_the_edge_do_not_panic() {
        let mut image = RgbImage::new(20, 40);
        let detection = Detection::new(0, 0.5, BoundingBox::new(-10.0, -10.0, 40.0, 30.0));
        draw_detection(&mut image, &detection);
        assert_eq!(image.get_pixel(0, 25), &BOX_COLOR);
        assert_eq!(image.get_pixel(19, 25), &BOX_COLOR);
    }

    #[test]
    fn timestamp_draws_white_text_bottom_left() {
        let mut image = RgbImage::new(320, 240);
        let time = NaiveTime::from_hms_opt(12, 34, 56).unwrap();
        draw_timestamp(&mut image, time);

        let bottom_left_white = (0..160)
            .flat_map(|x| (200..240).map(move |y| (x, y)))
            .any(|(x, y)| image.get_pixel(x, y) == &TEXT_COLOR);
        assert!(bottom_left_white);
        let top_half_white = image
            .enumerate_pixels()
            .any(|(_, y, p)| y < 120 && p == &TEXT_COLOR);
        assert!(!top_half_white);
    }

    #[test]
    fn jpeg_output_has_soi_marker() -> Result<()> {
        let jpeg = encode_jpeg(&RgbImage::new(16, 16), 80)?;
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        Ok(())
    }

    #[test]
    fn placeholder_decodes_back() -> Result<()> {
        let jpeg = placeholder_jpeg(80)?;
        let decoded = image::load_from_memory(&jpeg)?;
        assert_eq!(decoded.width(), PLACEHOLDER_WIDTH);
        assert_eq!(decoded.height(), PLACEHOLDER_HEIGHT);
        Ok(())
    }
}
