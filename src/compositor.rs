use image::{imageops::FilterType, RgbImage, RgbaImage};

use crate::types::FaceRect;

/// Overlay width relative to the face box
const WIDTH_RATIO: f64 = 0.8;
/// Vertical gap between face box and overlay, in pixels
const FACE_GAP: i64 = 10;

/// Overlay pixels, with or without an alpha channel
#[derive(Clone, Debug)]
pub enum Overlay {
    Opaque(RgbImage),
    Transparent(RgbaImage),
}

impl Overlay {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Overlay::Opaque(img) => img.dimensions(),
            Overlay::Transparent(img) => img.dimensions(),
        }
    }

    pub fn has_alpha(&self) -> bool {
        matches!(self, Overlay::Transparent(_))
    }

    /// Resamples to `width` x `height`; same-size requests copy the pixels as is.
    pub fn scaled(&self, width: u32, height: u32) -> Overlay {
        if (width, height) == self.dimensions() {
            return self.clone();
        }
        match self {
            Overlay::Opaque(img) => Overlay::Opaque(image::imageops::resize(
                img,
                width,
                height,
                FilterType::Triangle,
            )),
            Overlay::Transparent(img) => Overlay::Transparent(image::imageops::resize(
                img,
                width,
                height,
                FilterType::Triangle,
            )),
        }
    }
}

/// Where and how large to draw an overlay for one face
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
    pub scale: f64,
}

/// Sizes the overlay to 80% of the face width, keeps its aspect ratio and
/// centres it 10px above the face. Falls back to 10px below the face when
/// the overlay would start above the top edge of the frame.
pub fn overlay_placement(face: FaceRect, overlay_size: (u32, u32)) -> Option<Placement> {
    let (native_w, native_h) = overlay_size;
    if native_w == 0 {
        return None;
    }
    let width = (face.width as f64 * WIDTH_RATIO) as u32;
    let scale = width as f64 / native_w as f64;
    let height = (native_h as f64 * scale) as u32;

    let x = face.x as i64 + (face.width.saturating_sub(width) / 2) as i64;
    let mut y = face.y as i64 - height as i64 - FACE_GAP;
    if y < 0 {
        y = face.y as i64 + face.height as i64 + FACE_GAP;
    }
    Some(Placement {
        x,
        y,
        width,
        height,
        scale,
    })
}

/// Blends `overlay`, resized by `scale`, onto `background` with its top-left
/// corner at (`x`, `y`). Placement may hang off any edge; only the part that
/// lands inside the background is written. Pixels with alpha are mixed as
/// `fg * a + bg * (1 - a)` and truncated, opaque overlays are copied.
///
/// The background is modified in place and handed back.
pub fn composite<'a>(
    background: &'a mut RgbImage,
    overlay: Option<&Overlay>,
    x: i64,
    y: i64,
    scale: f64,
) -> &'a mut RgbImage {
    let Some(overlay) = overlay else {
        return background;
    };
    if !scale.is_finite() || scale <= 0.0 {
        return background;
    }

    let (native_w, native_h) = overlay.dimensions();
    let new_w = (native_w as f64 * scale) as u32;
    let new_h = (native_h as f64 * scale) as u32;
    if new_w == 0 || new_h == 0 {
        return background;
    }

    let (bg_w, bg_h) = background.dimensions();
    let x1 = x.max(0);
    let y1 = y.max(0);
    let x2 = (x + new_w as i64).min(bg_w as i64);
    let y2 = (y + new_h as i64).min(bg_h as i64);
    if x2 <= x1 || y2 <= y1 {
        return background;
    }

    // Source offset inside the resized overlay when it hangs off the top/left
    let src_x = (x1 - x) as u32;
    let src_y = (y1 - y) as u32;
    let (dst_x, dst_y) = (x1 as u32, y1 as u32);
    let (roi_w, roi_h) = ((x2 - x1) as u32, (y2 - y1) as u32);

    match overlay.scaled(new_w, new_h) {
        Overlay::Transparent(fg) => {
            for dy in 0..roi_h {
                for dx in 0..roi_w {
                    let src = fg.get_pixel(src_x + dx, src_y + dy);
                    let alpha = src[3] as f64 / 255.0;
                    let dst = background.get_pixel_mut(dst_x + dx, dst_y + dy);
                    for c in 0..3 {
                        let mixed = src[c] as f64 * alpha + dst[c] as f64 * (1.0 - alpha);
                        dst[c] = mixed as u8;
                    }
                }
            }
        }
        Overlay::Opaque(fg) => {
            for dy in 0..roi_h {
                for dx in 0..roi_w {
                    let src = *fg.get_pixel(src_x + dx, src_y + dy);
                    background.put_pixel(dst_x + dx, dst_y + dy, src);
                }
            }
        }
    }
    background
}
