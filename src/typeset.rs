use crate::config::CardStyle;
use ab_glyph::{Font, FontArc, PxScale, ScaleFont, point};
use image::RgbaImage;
use imageproc::drawing::draw_text_mut;

/// Pixel extent of a single line of text as `draw_text_mut` lays it out.
/// `top` is the offset from the draw origin to the first inked row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextBox {
    pub width: u32,
    pub height: u32,
    pub top: i32,
}

pub fn measure_text(font: &FontArc, size: f32, text: &str) -> TextBox {
    let scale = PxScale::from(size);
    let scaled = font.as_scaled(scale);
    let mut caret = 0f32;
    let mut last = None;
    let mut min_y = f32::MAX;
    let mut max_y = f32::MIN;
    for ch in text.chars() {
        let glyph_id = scaled.glyph_id(ch);
        if let Some(previous) = last {
            caret += scaled.kern(previous, glyph_id);
        }
        let glyph = glyph_id.with_scale_and_position(scale, point(caret, scaled.ascent()));
        caret += scaled.h_advance(glyph_id);
        last = Some(glyph_id);
        if let Some(outlined) = font.outline_glyph(glyph) {
            let bounds = outlined.px_bounds();
            min_y = min_y.min(bounds.min.y);
            max_y = max_y.max(bounds.max.y);
        }
    }
    if min_y > max_y {
        return TextBox {
            width: caret.max(0.0) as u32,
            height: 0,
            top: 0,
        };
    }
    TextBox {
        width: caret.max(0.0).ceil() as u32,
        height: (max_y - min_y).ceil() as u32,
        top: min_y.round() as i32,
    }
}

/// Greedy word wrap by character count.
///
/// Words longer than a full line are broken, filling what is left of the
/// current line first. Anything past `max_lines` is dropped without an
/// ellipsis.
pub fn wrap_title(title: &str, columns: usize, max_lines: usize) -> Vec<String> {
    let columns = columns.max(1);
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in title.split_whitespace() {
        let word_len = word.chars().count();
        let needed = if current_len == 0 {
            word_len
        } else {
            current_len + 1 + word_len
        };
        if needed <= columns {
            if current_len > 0 {
                current.push(' ');
            }
            current.push_str(word);
            current_len = needed;
            continue;
        }
        if word_len <= columns {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
            current_len = word_len;
            continue;
        }

        let mut rest: Vec<char> = word.chars().collect();
        if current_len > 0 {
            let space_left = columns.saturating_sub(current_len + 1);
            if space_left > 0 {
                current.push(' ');
                current.extend(rest.drain(..space_left));
            }
            lines.push(std::mem::take(&mut current));
        }
        while rest.len() > columns {
            lines.push(rest.drain(..columns).collect());
        }
        current = rest.into_iter().collect();
        current_len = current.chars().count();
        if lines.len() >= max_lines {
            break;
        }
    }
    if current_len > 0 {
        lines.push(current);
    }
    lines.truncate(max_lines);
    lines
}

/// Draws pre-wrapped title lines stacked from the title origin.
pub fn draw_title(canvas: &mut RgbaImage, font: &FontArc, style: &CardStyle, lines: &[String]) {
    let scale = PxScale::from(style.title_font_size);
    for (index, line) in lines.iter().enumerate() {
        let y = style.title_y + index as i32 * style.title_line_height;
        draw_text_mut(canvas, style.title_color, style.title_x, y, scale, font, line);
    }
}
