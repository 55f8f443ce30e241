use crate::config::CardStyle;
use anyhow::{Result, anyhow};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Rgba, RgbaImage};

pub fn decode_image(bytes: &[u8], max_pixels: u64) -> Result<DynamicImage> {
    let mut reader = ImageReader::new(std::io::Cursor::new(bytes)).with_guessed_format()?;
    reader.limits(decode_limits(max_pixels));
    let (width, height) = reader.into_dimensions()?;
    if width == 0 || height == 0 {
        return Err(anyhow!("image has invalid dimensions"));
    }
    if (width as u64).saturating_mul(height as u64) > max_pixels {
        return Err(anyhow!("image exceeds max decoded pixels"));
    }
    let mut reader = ImageReader::new(std::io::Cursor::new(bytes)).with_guessed_format()?;
    reader.limits(decode_limits(max_pixels));
    Ok(reader.decode()?)
}

fn decode_limits(max_pixels: u64) -> image::Limits {
    let max_dim = max_pixels.min(u32::MAX as u64) as u32;
    let mut limits = image::Limits::default();
    limits.max_image_width = Some(max_dim);
    limits.max_image_height = Some(max_dim);
    limits.max_alloc = Some(max_pixels.saturating_mul(4));
    limits
}

pub fn solid_background(style: &CardStyle) -> RgbaImage {
    let [r, g, b] = style.background.0;
    RgbaImage::from_pixel(style.width, style.height, Rgba([r, g, b, 255]))
}

/// Largest centred region of a `src_w`x`src_h` image with the target's
/// aspect ratio, as `(left, top, width, height)` in source pixels.
pub fn cover_crop(src_w: u32, src_h: u32, target_w: u32, target_h: u32) -> (u32, u32, u32, u32) {
    let (src_w64, src_h64) = (src_w as u64, src_h as u64);
    let (target_w64, target_h64) = (target_w as u64, target_h as u64);
    if src_w64 * target_h64 > src_h64 * target_w64 {
        let width = (src_h64 * target_w64 + target_h64 / 2) / target_h64;
        let width = width.clamp(1, src_w64) as u32;
        ((src_w - width) / 2, 0, width, src_h)
    } else {
        let height = (src_w64 * target_h64 + target_w64 / 2) / target_w64;
        let height = height.clamp(1, src_h64) as u32;
        (0, (src_h - height) / 2, src_w, height)
    }
}

/// Centre-crop `source` to the card's aspect, scale to the canvas and dim.
pub fn cover_background(source: &DynamicImage, style: &CardStyle) -> RgbaImage {
    let (left, top, width, height) =
        cover_crop(source.width(), source.height(), style.width, style.height);
    let mut canvas = source
        .crop_imm(left, top, width, height)
        .resize_exact(style.width, style.height, FilterType::Lanczos3)
        .to_rgba8();
    for pixel in canvas.pixels_mut() {
        pixel[3] = 255;
    }
    apply_brightness(&mut canvas, style.brightness);
    canvas
}

pub fn background(source: Option<&DynamicImage>, style: &CardStyle) -> RgbaImage {
    match source {
        Some(source) => cover_background(source, style),
        None => solid_background(style),
    }
}

/// Multiply every colour channel by `factor`, keeping hue.
pub fn apply_brightness(canvas: &mut RgbaImage, factor: f32) {
    let factor = factor.max(0.0);
    for pixel in canvas.pixels_mut() {
        for channel in pixel.0.iter_mut().take(3) {
            *channel = (*channel as f32 * factor).round().min(255.0) as u8;
        }
    }
}

/// Black layer at `alpha` over an opaque canvas: `out = dst * (1 - alpha)`.
pub fn apply_scrim(canvas: &mut RgbaImage, alpha: u8) {
    for pixel in canvas.pixels_mut() {
        for channel in pixel.0.iter_mut().take(3) {
            *channel = scrim_channel(*channel, alpha);
        }
    }
}

pub fn scrim_channel(value: u8, alpha: u8) -> u8 {
    ((value as u32 * (255 - alpha as u32) + 127) / 255) as u8
}

/// Scale the logo to the card's logo height and alpha-blend it at the anchor.
pub fn place_logo(canvas: &mut RgbaImage, logo: &DynamicImage, style: &CardStyle) {
    let aspect = logo.width() as f64 / logo.height() as f64;
    let width = ((style.logo_height as f64 * aspect).round() as u32).max(1);
    let scaled = logo
        .resize_exact(width, style.logo_height, FilterType::Lanczos3)
        .to_rgba8();
    imageops::overlay(canvas, &scaled, style.logo_x, style.logo_y);
}

/// Composite any translucent pixels over the card background so the result
/// is fully opaque.
pub fn flatten(canvas: &mut RgbaImage, style: &CardStyle) {
    let [br, bg, bb] = style.background.0;
    for pixel in canvas.pixels_mut() {
        let alpha = pixel[3] as u32;
        if alpha == 255 {
            continue;
        }
        let blend = |src: u8, dst: u8| -> u8 {
            ((src as u32 * alpha + dst as u32 * (255 - alpha) + 127) / 255) as u8
        };
        *pixel = Rgba([
            blend(pixel[0], br),
            blend(pixel[1], bg),
            blend(pixel[2], bb),
            255,
        ]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::png_bytes;

    fn style() -> CardStyle {
        CardStyle::default()
    }

    #[test]
    fn cover_crop_wide_source_keeps_full_height() {
        assert_eq!(cover_crop(4000, 1000, 1200, 630), (1047, 0, 1905, 1000));
    }

    #[test]
    fn cover_crop_tall_source_keeps_full_width() {
        assert_eq!(cover_crop(1000, 2000, 1200, 630), (0, 737, 1000, 525));
    }

    #[test]
    fn cover_crop_exact_aspect_is_whole_image() {
        assert_eq!(cover_crop(2400, 1260, 1200, 630), (0, 0, 2400, 1260));
    }

    #[test]
    fn cover_crop_stays_inside_source() {
        for (w, h) in [(1201, 631), (3, 2), (1, 1), (4000, 2), (1, 40_000_000), (630, 1200)] {
            let (left, top, cw, ch) = cover_crop(w, h, 1200, 630);
            assert!(cw >= 1 && ch >= 1, "{w}x{h} -> {cw}x{ch}");
            assert!(left + cw <= w && top + ch <= h, "{w}x{h} -> {left},{top} {cw}x{ch}");
        }
    }

    #[test]
    fn extreme_aspect_source_renders_at_canvas_size() {
        let bytes = png_bytes(4000, 2, Rgba([250, 250, 250, 255]));
        let source = decode_image(&bytes, 40_000_000).unwrap();
        let canvas = cover_background(&source, &style());
        assert_eq!(canvas.dimensions(), (1200, 630));
        assert_eq!(*canvas.get_pixel(600, 315), Rgba([100, 100, 100, 255]));
    }

    #[test]
    fn solid_background_is_uniform() {
        let canvas = solid_background(&style());
        assert_eq!(canvas.dimensions(), (1200, 630));
        assert!(canvas.pixels().all(|p| *p == Rgba([20, 50, 100, 255])));
    }

    #[test]
    fn cover_background_is_canvas_sized_and_dimmed() {
        let source = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            300,
            900,
            Rgba([200, 100, 50, 255]),
        ));
        let canvas = cover_background(&source, &style());
        assert_eq!(canvas.dimensions(), (1200, 630));
        let center = canvas.get_pixel(600, 315);
        assert_eq!(*center, Rgba([80, 40, 20, 255]));
    }

    #[test]
    fn cover_background_crops_the_center() {
        // left third red, middle third green, right third blue
        let mut source = RgbaImage::new(3000, 630);
        for (x, _, pixel) in source.enumerate_pixels_mut() {
            *pixel = match x {
                0..1000 => Rgba([250, 0, 0, 255]),
                1000..2000 => Rgba([0, 250, 0, 255]),
                _ => Rgba([0, 0, 250, 255]),
            };
        }
        let canvas = cover_background(&DynamicImage::ImageRgba8(source), &style());
        assert_eq!(*canvas.get_pixel(600, 315), Rgba([0, 100, 0, 255]));
    }

    #[test]
    fn brightness_preserves_hue() {
        let mut canvas = RgbaImage::from_pixel(2, 2, Rgba([250, 125, 50, 255]));
        apply_brightness(&mut canvas, 0.4);
        assert_eq!(*canvas.get_pixel(1, 1), Rgba([100, 50, 20, 255]));
    }

    #[test]
    fn scrim_darkens_uniformly() {
        let mut canvas = RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255]));
        apply_scrim(&mut canvas, 130);
        assert_eq!(*canvas.get_pixel(0, 0), Rgba([125, 125, 125, 255]));
        assert_eq!(scrim_channel(255, 130), 125);
        assert_eq!(scrim_channel(0, 130), 0);
    }

    #[test]
    fn logo_is_scaled_and_transparent_pixels_leave_canvas() {
        let mut logo = RgbaImage::from_pixel(200, 100, Rgba([255, 0, 0, 255]));
        for x in 100..200 {
            for y in 0..100 {
                logo.put_pixel(x, y, Rgba([0, 0, 0, 0]));
            }
        }
        let mut canvas = solid_background(&style());
        place_logo(&mut canvas, &DynamicImage::ImageRgba8(logo), &style());
        // logo is 100x50 at (50, 40); left half opaque red, right half clear
        assert_eq!(*canvas.get_pixel(60, 60), Rgba([255, 0, 0, 255]));
        assert_eq!(*canvas.get_pixel(140, 60), Rgba([20, 50, 100, 255]));
        assert_eq!(*canvas.get_pixel(60, 95), Rgba([20, 50, 100, 255]));
        assert_eq!(*canvas.get_pixel(200, 60), Rgba([20, 50, 100, 255]));
    }

    #[test]
    fn decode_image_rejects_garbage_and_oversized() {
        assert!(decode_image(b"definitely not an image", 1_000_000).is_err());
        let bytes = png_bytes(100, 100, Rgba([1, 2, 3, 255]));
        assert!(decode_image(&bytes, 1_000_000).is_ok());
        assert!(decode_image(&bytes, 5_000).is_err());
    }

    #[test]
    fn flatten_makes_canvas_opaque() {
        let mut canvas = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 0]));
        flatten(&mut canvas, &style());
        assert_eq!(*canvas.get_pixel(0, 0), Rgba([20, 50, 100, 255]));
    }
}
