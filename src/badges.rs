use crate::config::CardStyle;
use crate::metadata::ArticleMetadata;
use crate::typeset::{TextBox, measure_text};
use ab_glyph::{FontArc, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::debug;

/// A laid-out label. `x`/`y` are the top-left of the filled rectangle.
#[derive(Debug, Clone, PartialEq)]
pub struct Badge {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub text_box: TextBox,
    pub fill: Rgba<u8>,
    pub text_color: Rgba<u8>,
}

/// Packs the category and premium badges right to left from the right
/// margin. A badge that would cross the left edge is dropped along with
/// everything after it.
pub fn layout_badges<F>(meta: &ArticleMetadata, style: &CardStyle, measure: F) -> Vec<Badge>
where
    F: Fn(&str) -> TextBox,
{
    let mut candidates = Vec::with_capacity(2);
    if let Some(category) = meta.category_tag.as_deref() {
        candidates.push((category, style.category_fill, style.category_text));
    }
    if meta.is_premium {
        candidates.push((
            style.premium_label.as_str(),
            style.premium_fill,
            style.premium_text,
        ));
    }

    let padding = style.badge_padding as i64;
    let mut cursor = style.width as i64 - style.badge_right_margin as i64;
    let mut badges = Vec::with_capacity(candidates.len());
    for (text, fill, text_color) in candidates {
        let text_box = measure(text);
        let width = text_box.width as i64 + 2 * padding;
        let height = text_box.height as i64 + 2 * padding;
        let x = cursor - width;
        if x < 0 {
            debug!(badge = text, "badge does not fit, dropping");
            break;
        }
        badges.push(Badge {
            text: text.to_string(),
            x: x as i32,
            y: style.badge_top,
            width: width as u32,
            height: height as u32,
            text_box,
            fill,
            text_color,
        });
        cursor = x - style.badge_gutter as i64;
    }
    badges
}

pub fn draw_badges(canvas: &mut RgbaImage, font: &FontArc, style: &CardStyle, badges: &[Badge]) {
    let scale = PxScale::from(style.badge_font_size);
    let padding = style.badge_padding as i32;
    for badge in badges {
        fill_rounded_rect(
            canvas,
            badge.x,
            badge.y,
            badge.width,
            badge.height,
            style.badge_radius,
            badge.fill,
        );
        draw_text_mut(
            canvas,
            badge.text_color,
            badge.x + padding,
            badge.y + padding - badge.text_box.top,
            scale,
            font,
            &badge.text,
        );
    }
}

/// Lays out and draws the badges for `meta` with the badge font size.
pub fn render_badges(
    canvas: &mut RgbaImage,
    font: &FontArc,
    style: &CardStyle,
    meta: &ArticleMetadata,
) -> usize {
    let badges = layout_badges(meta, style, |text| {
        measure_text(font, style.badge_font_size, text)
    });
    draw_badges(canvas, font, style, &badges);
    badges.len()
}

pub fn fill_rounded_rect(
    canvas: &mut RgbaImage,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    radius: u32,
    color: Rgba<u8>,
) {
    if width == 0 || height == 0 {
        return;
    }
    let radius = radius.min(width / 2).min(height / 2);
    if radius == 0 {
        draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(width, height), color);
        return;
    }
    let r = radius as i32;
    if height > 2 * radius {
        draw_filled_rect_mut(
            canvas,
            Rect::at(x, y + r).of_size(width, height - 2 * radius),
            color,
        );
    }
    if width > 2 * radius {
        draw_filled_rect_mut(
            canvas,
            Rect::at(x + r, y).of_size(width - 2 * radius, height),
            color,
        );
    }
    let right = x + width as i32 - 1 - r;
    let bottom = y + height as i32 - 1 - r;
    for center in [(x + r, y + r), (right, y + r), (x + r, bottom), (right, bottom)] {
        draw_filled_circle_mut(canvas, center, r, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fonts::FontSet;

    fn meta(category: Option<&str>, premium: bool) -> ArticleMetadata {
        ArticleMetadata {
            title: "Title".to_string(),
            excerpt: None,
            feature_image_url: None,
            category_tag: category.map(str::to_string),
            is_premium: premium,
        }
    }

    fn fixed_measure(text: &str) -> TextBox {
        TextBox {
            width: text.chars().count() as u32 * 10,
            height: 14,
            top: 4,
        }
    }

    #[test]
    fn category_and_premium_pack_right_to_left() {
        let style = CardStyle::default();
        let badges = layout_badges(&meta(Some("FOOTBALL"), true), &style, fixed_measure);
        assert_eq!(badges.len(), 2);
        let (category, premium) = (&badges[0], &badges[1]);
        assert_eq!(category.text, "FOOTBALL");
        assert_eq!((category.x, category.width, category.height), (1050, 100, 34));
        assert_eq!(category.x + category.width as i32, 1150);
        assert_eq!(premium.text, "PREMIUM");
        assert_eq!((premium.x, premium.width), (948, 90));
        assert_eq!(premium.x + premium.width as i32 + 12, category.x);
        assert!(badges.iter().all(|badge| badge.y == 45));
    }

    #[test]
    fn absent_fields_yield_no_badges() {
        let style = CardStyle::default();
        assert!(layout_badges(&meta(None, false), &style, fixed_measure).is_empty());
    }

    #[test]
    fn premium_alone_takes_the_anchor() {
        let style = CardStyle::default();
        let badges = layout_badges(&meta(None, true), &style, fixed_measure);
        assert_eq!(badges.len(), 1);
        assert_eq!(badges[0].x + badges[0].width as i32, 1150);
        assert_eq!(badges[0].fill, style.premium_fill);
    }

    #[test]
    fn badges_past_the_left_edge_are_dropped() {
        let style = CardStyle::default();
        let long = "W".repeat(120);
        let badges = layout_badges(&meta(Some(&long), true), &style, fixed_measure);
        assert!(badges.is_empty());

        let wide = "W".repeat(105);
        let badges = layout_badges(&meta(Some(&wide), true), &style, fixed_measure);
        assert_eq!(badges.len(), 1);
        assert_eq!(badges[0].x, 80);
    }

    #[test]
    fn real_font_badges_stay_on_canvas() {
        let fonts = FontSet::embedded().unwrap();
        let style = CardStyle::default();
        let badges = layout_badges(&meta(Some("FOOTBALL"), true), &style, |text| {
            measure_text(&fonts.bold, style.badge_font_size, text)
        });
        assert_eq!(badges.len(), 2);
        assert!(badges.iter().all(|badge| badge.x >= 0));
        assert!(badges[1].x + (badges[1].width as i32) < badges[0].x);
        assert!(badges[0].x + badges[0].width as i32 <= style.width as i32);
    }

    #[test]
    fn rounded_rect_leaves_corners_clear() {
        let background = Rgba([0, 0, 0, 255]);
        let fill = Rgba([255, 255, 255, 255]);
        let mut canvas = RgbaImage::from_pixel(100, 60, background);
        fill_rounded_rect(&mut canvas, 10, 10, 60, 30, 5, fill);
        assert_eq!(*canvas.get_pixel(10, 10), background);
        assert_eq!(*canvas.get_pixel(69, 39), background);
        assert_eq!(*canvas.get_pixel(12, 25), fill);
        assert_eq!(*canvas.get_pixel(40, 10), fill);
        assert_eq!(*canvas.get_pixel(9, 25), background);
        assert_eq!(*canvas.get_pixel(70, 25), background);
    }

    #[test]
    fn zero_sized_rect_is_a_no_op() {
        let background = Rgba([0, 0, 0, 255]);
        let mut canvas = RgbaImage::from_pixel(10, 10, background);
        fill_rounded_rect(&mut canvas, 0, 0, 0, 5, 5, Rgba([255, 0, 0, 255]));
        assert!(canvas.pixels().all(|pixel| *pixel == background));
    }

    #[test]
    fn drawn_badge_keeps_text_inside_the_fill() {
        let fonts = FontSet::embedded().unwrap();
        let style = CardStyle::default();
        let background = Rgba([0, 0, 0, 255]);
        let mut canvas = RgbaImage::from_pixel(style.width, style.height, background);
        let drawn = render_badges(&mut canvas, &fonts.bold, &style, &meta(Some("FOOTBALL"), false));
        assert_eq!(drawn, 1);
        let badges = layout_badges(&meta(Some("FOOTBALL"), false), &style, |text| {
            measure_text(&fonts.bold, style.badge_font_size, text)
        });
        let badge = &badges[0];
        // left padding column is pure fill, just outside the rectangle is untouched
        let mid_y = (badge.y + badge.height as i32 / 2) as u32;
        assert_eq!(*canvas.get_pixel(badge.x as u32 + 2, mid_y), style.category_fill);
        assert_eq!(*canvas.get_pixel(badge.x as u32 - 1, mid_y), background);
        // some text pixels differ from the fill
        let inner = (badge.x as u32 + 10..badge.x as u32 + badge.width - 10)
            .any(|x| *canvas.get_pixel(x, mid_y) != style.category_fill);
        assert!(inner);
        assert!(
            (0..badge.y as u32).all(|y| *canvas.get_pixel(badge.x as u32 + 20, y) == background)
        );
    }
}
