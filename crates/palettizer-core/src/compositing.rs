use crate::model::{Rect, TexturePosition, WrapMode};
use crate::placement::uv_transform_for;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

/// Paint `source` into the placed rectangle of `canvas`.
///
/// The source is scaled so that its used UV range exactly fills the
/// rectangle minus its margin; the margin (and anything else outside the
/// texture) is filled according to the placed wrap modes.
pub fn fill_placement(canvas: &mut RgbaImage, source: &RgbaImage, placed: &TexturePosition) {
    let (pal_w, pal_h) = canvas.dimensions();
    let t = uv_transform_for(placed, pal_w, pal_h);

    // corners of the whole texture, (0,1) top-left and (1,0) bottom-right
    let ul = t.apply([0.0, 1.0]);
    let lr = t.apply([1.0, 0.0]);
    let round = |v: f64| (v + 0.5).floor() as i64;
    let top = round((1.0 - ul[1]) * pal_h as f64);
    let left = round(ul[0] * pal_w as f64);
    let bottom = round((1.0 - lr[1]) * pal_h as f64);
    let right = round(lr[0] * pal_w as f64);

    let tex_w = right - left;
    let tex_h = bottom - top;
    if tex_w <= 0 || tex_h <= 0 {
        return;
    }
    let scaled = imageops::resize(source, tex_w as u32, tex_h as u32, FilterType::Triangle);

    let rect = placed.rect();
    for y in rect.y..rect.bottom().min(pal_h) {
        let Some(sy) = wrap_index(y as i64 - top, tex_h, placed.wrap_v) else {
            continue;
        };
        for x in rect.x..rect.right().min(pal_w) {
            let Some(sx) = wrap_index(x as i64 - left, tex_w, placed.wrap_u) else {
                continue;
            };
            canvas.put_pixel(x, y, *scaled.get_pixel(sx as u32, sy as u32));
        }
    }
}

/// Maps a texel offset `i` onto `0..size`, or `None` where nothing should be drawn.
pub fn wrap_index(i: i64, size: i64, mode: WrapMode) -> Option<i64> {
    match mode {
        WrapMode::Clamp => Some(i.clamp(0, size - 1)),
        WrapMode::Mirror => {
            let period = size * 2;
            let m = i.rem_euclid(period);
            Some(if m < size { m } else { period - m - 1 })
        }
        WrapMode::MirrorOnce => {
            let m = if i < 0 { -i - 1 } else { i };
            (m < size).then_some(m)
        }
        WrapMode::BorderColor => (0..size).contains(&i).then_some(i),
        WrapMode::Repeat | WrapMode::Unspecified => Some(i.rem_euclid(size)),
    }
}

/// Fill a rectangle with a solid color, clipped to the canvas.
pub fn clear_region(canvas: &mut RgbaImage, rect: &Rect, color: [u8; 4]) {
    let (cw, ch) = canvas.dimensions();
    let px = Rgba(color);
    for y in rect.y..rect.bottom().min(ch) {
        for x in rect.x..rect.right().min(cw) {
            canvas.put_pixel(x, y, px);
        }
    }
}

/// Mark a placement whose source could not be read: solid opaque red.
pub fn flag_error(canvas: &mut RgbaImage, rect: &Rect) {
    clear_region(canvas, rect, [255, 0, 0, 255]);
}

/// A `width` x `height` canvas filled with `background`.
pub fn blank_canvas(width: u32, height: u32, background: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(background))
}
