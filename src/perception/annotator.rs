//! Draw Set-of-Mark overlays on a screenshot.
//!
//! Each labelled element gets a red outline and a filled red tag carrying its
//! index in white digits. The tag sits above the box, or inside its top edge
//! when there is no room above.
use crate::errors::{MarksmanError, MarksmanResult};
use crate::perception::types::{FilteredElementSet, Viewport};

const BOX_COLOUR: [u8; 4] = [255, 0, 0, 255];
const TAG_COLOUR: [u8; 4] = [220, 0, 0, 255];
const DIGIT_COLOUR: [u8; 4] = [255, 255, 255, 255];

/// Decode a PNG/JPEG screenshot into an RGBA canvas.
pub fn load_screenshot(src_bytes: &[u8]) -> MarksmanResult<image::RgbaImage> {
    let img = image::load_from_memory(src_bytes)
        .map_err(|e| MarksmanError::Render(format!("screenshot decode: {e}")))?;
    Ok(img.to_rgba8())
}

pub fn viewport_of(canvas: &image::RgbaImage) -> Viewport {
    let (width, height) = canvas.dimensions();
    Viewport { width, height }
}

/// Annotate `canvas` with one box and tag per element and return PNG bytes.
///
/// Labels are drawn at 3× glyph scale on wide (> 1600 px) screenshots so the
/// digits stay legible to the vision model.
pub fn annotate_image(
    mut canvas: image::RgbaImage,
    elements: &FilteredElementSet,
) -> MarksmanResult<Vec<u8>> {
    let (w, _) = canvas.dimensions();
    let label_scale: u32 = if w > 1600 { 3 } else { 2 };
    let box_thickness: i32 = if w > 1600 { 3 } else { 2 };

    for elem in elements {
        let b = &elem.bounding_box;
        let x1 = b.x.round() as i32;
        let y1 = b.y.round() as i32;
        let x2 = b.right().round() as i32;
        let y2 = b.bottom().round() as i32;

        draw_rect(&mut canvas, x1, y1, x2, y2, BOX_COLOUR, box_thickness);
        draw_index_tag(&mut canvas, x1, y1, &elem.index.to_string(), label_scale);
    }

    encode_png(canvas)
}

pub fn encode_png(canvas: image::RgbaImage) -> MarksmanResult<Vec<u8>> {
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(canvas)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .map_err(|e| MarksmanError::Render(format!("PNG encode: {e}")))?;
    Ok(out)
}

/// Pixel size of the tag for `text` at `scale`: (width, height).
fn tag_size(text: &str, scale: u32) -> (u32, u32) {
    let pad = 2 * scale;
    let glyph_w = 5 * scale;
    let n = text.chars().count() as u32;
    let text_w = n * glyph_w + n.saturating_sub(1) * scale;
    (text_w + pad * 2, glyph_w + pad * 2)
}

/// Where the tag of a box whose top-left corner is (`x`, `y`) goes.
fn tag_origin(x: i32, y: i32, tag_w: u32, tag_h: u32, canvas_w: u32) -> (u32, u32) {
    let tag_y = if y > tag_h as i32 { y - tag_h as i32 } else { y.max(0) };
    let max_x = canvas_w.saturating_sub(tag_w) as i32;
    let tag_x = x.clamp(0, max_x.max(0));
    (tag_x as u32, tag_y as u32)
}

// ── Drawing primitives ──────────────────────────────────────────────────────

fn draw_rect(
    canvas: &mut image::RgbaImage,
    x1: i32, y1: i32, x2: i32, y2: i32,
    col: [u8; 4],
    thickness: i32,
) {
    let (w, h) = canvas.dimensions();
    let (iw, ih) = (w as i32, h as i32);

    // Top & bottom edges
    for t in 0..thickness {
        let ty = y1 + t;
        let by = y2 - t;
        for x in x1..=x2 {
            if x >= 0 && x < iw {
                if ty >= 0 && ty < ih { set_pixel(canvas, x as u32, ty as u32, col); }
                if by >= 0 && by < ih { set_pixel(canvas, x as u32, by as u32, col); }
            }
        }
    }
    // Left & right edges
    for t in 0..thickness {
        let lx = x1 + t;
        let rx = x2 - t;
        for y in y1..=y2 {
            if y >= 0 && y < ih {
                if lx >= 0 && lx < iw { set_pixel(canvas, lx as u32, y as u32, col); }
                if rx >= 0 && rx < iw { set_pixel(canvas, rx as u32, y as u32, col); }
            }
        }
    }
}

fn draw_index_tag(canvas: &mut image::RgbaImage, x: i32, y: i32, text: &str, scale: u32) {
    let (w, h) = canvas.dimensions();
    let (tag_w, tag_h) = tag_size(text, scale);
    let (tx, ty) = tag_origin(x, y, tag_w, tag_h, w);

    for dy in 0..tag_h {
        for dx in 0..tag_w {
            let (px, py) = (tx + dx, ty + dy);
            if px < w && py < h {
                set_pixel(canvas, px, py, TAG_COLOUR);
            }
        }
    }

    let pad = 2 * scale;
    let step = 5 * scale + scale;
    for (i, c) in text.chars().enumerate() {
        draw_digit(canvas, c, tx + pad + i as u32 * step, ty + pad, DIGIT_COLOUR, scale);
    }
}

fn draw_digit(canvas: &mut image::RgbaImage, c: char, px: u32, py: u32, col: [u8; 4], scale: u32) {
    let Some(glyph) = c.to_digit(10).map(|d| DIGIT_FONT[d as usize]) else {
        return;
    };
    let (w, h) = canvas.dimensions();
    for (row, &bits) in glyph.iter().enumerate() {
        for bit in 0..5u32 {
            if (bits >> (4 - bit)) & 1 == 0 { continue; }
            for sy in 0..scale {
                for sx in 0..scale {
                    let x = px + bit * scale + sx;
                    let y = py + row as u32 * scale + sy;
                    if x < w && y < h {
                        set_pixel(canvas, x, y, col);
                    }
                }
            }
        }
    }
}

fn set_pixel(canvas: &mut image::RgbaImage, x: u32, y: u32, col: [u8; 4]) {
    let p = canvas.get_pixel_mut(x, y);
    let a = col[3] as f32 / 255.0;
    p[0] = (p[0] as f32 * (1.0 - a) + col[0] as f32 * a).round() as u8;
    p[1] = (p[1] as f32 * (1.0 - a) + col[1] as f32 * a).round() as u8;
    p[2] = (p[2] as f32 * (1.0 - a) + col[2] as f32 * a).round() as u8;
    p[3] = 255;
}

/// 5×5 bitmap digits; bit 4 is the leftmost pixel.
const DIGIT_FONT: [[u8; 5]; 10] = [
    [0b01110, 0b10001, 0b10001, 0b10001, 0b01110], // 0
    [0b00100, 0b01100, 0b00100, 0b00100, 0b01110], // 1
    [0b01110, 0b10001, 0b00110, 0b01000, 0b11111], // 2
    [0b11110, 0b00001, 0b00110, 0b00001, 0b11110], // 3
    [0b00110, 0b01010, 0b10010, 0b11111, 0b00010], // 4
    [0b11111, 0b10000, 0b11110, 0b00001, 0b11110], // 5
    [0b01110, 0b10000, 0b11110, 0b10001, 0b01110], // 6
    [0b11111, 0b00001, 0b00010, 0b00100, 0b00100], // 7
    [0b01110, 0b10001, 0b01110, 0b10001, 0b01110], // 8
    [0b01110, 0b10001, 0b01111, 0b00001, 0b01110], // 9
];
