// ============================================================================
// MASK CANVAS: live edit buffer and screen → canvas mapping
// ============================================================================

use egui::{Pos2, Rect, Vec2};
use image::{GrayImage, Luma, Rgba, RgbaImage};

use crate::error::MaskError;

/// Downscale factor between the target (generation) resolution and the
/// editing resolution.
pub const MASK_SCALE: u32 = 8;

/// Byte value of a painted pixel in the live buffer.
pub const PAINTED: u8 = 255;
/// Byte value of an unpainted pixel in the live buffer.
pub const UNPAINTED: u8 = 0;

/// Editing-canvas size for a target resolution: `ceil(w/8) × ceil(h/8)`.
pub fn edit_dimensions(target_w: u32, target_h: u32) -> Result<(u32, u32), MaskError> {
    MaskError::check_dimensions(target_w, target_h)?;
    Ok((target_w.div_ceil(MASK_SCALE), target_h.div_ceil(MASK_SCALE)))
}

// ---------------------------------------------------------------------------
//  MaskBuffer
// ---------------------------------------------------------------------------

/// Live edit buffer: one byte per pixel, `PAINTED` or `UNPAINTED`.
///
/// Only the codec boundary converts this to RGBA; the brush works on bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaskBuffer {
    pixels: GrayImage,
}

impl MaskBuffer {
    /// Blank (fully unpainted) buffer.
    pub fn new(width: u32, height: u32) -> Result<Self, MaskError> {
        MaskError::check_dimensions(width, height)?;
        Ok(Self {
            pixels: GrayImage::new(width, height),
        })
    }

    /// Wrap a grey image, snapping every non-zero value to `PAINTED`.
    pub fn from_gray(mut pixels: GrayImage) -> Self {
        for p in pixels.pixels_mut() {
            if p.0[0] != UNPAINTED {
                p.0[0] = PAINTED;
            }
        }
        Self { pixels }
    }

    /// Classify an editing-form image: any visible pixel counts as painted.
    pub fn from_editing_rgba(img: &RgbaImage) -> Self {
        let (w, h) = img.dimensions();
        let pixels = GrayImage::from_fn(w, h, |x, y| {
            if img.get_pixel(x, y).0[3] > 0 {
                Luma([PAINTED])
            } else {
                Luma([UNPAINTED])
            }
        });
        Self { pixels }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Length of the canvas diagonal in pixels (brush sizes are stored
    /// relative to it).
    pub fn diagonal(&self) -> f32 {
        let (w, h) = (self.width() as f32, self.height() as f32);
        (w * w + h * h).sqrt()
    }

    /// `false` for out-of-bounds coordinates.
    pub fn is_painted(&self, x: i32, y: i32) -> bool {
        if x < 0 || y < 0 {
            return false;
        }
        self.pixels
            .get_pixel_checked(x as u32, y as u32)
            .is_some_and(|p| p.0[0] != UNPAINTED)
    }

    /// Write one pixel; coordinates outside the buffer are clipped.
    #[inline]
    pub fn set(&mut self, x: i32, y: i32, value: u8) {
        if x < 0 || y < 0 || x as u32 >= self.width() || y as u32 >= self.height() {
            return;
        }
        self.pixels.put_pixel(x as u32, y as u32, Luma([value]));
    }

    pub fn clear(&mut self) {
        for p in self.pixels.pixels_mut() {
            p.0[0] = UNPAINTED;
        }
    }

    pub fn invert(&mut self) {
        for p in self.pixels.pixels_mut() {
            p.0[0] = if p.0[0] == UNPAINTED { PAINTED } else { UNPAINTED };
        }
    }

    pub fn painted_count(&self) -> usize {
        self.pixels.pixels().filter(|p| p.0[0] != UNPAINTED).count()
    }

    pub fn is_blank(&self) -> bool {
        self.pixels.pixels().all(|p| p.0[0] == UNPAINTED)
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.pixels
    }

    /// Editing form: painted → opaque `color`, unpainted → fully transparent.
    pub fn to_editing_rgba(&self, color: Rgba<u8>) -> RgbaImage {
        let (w, h) = self.dimensions();
        let painted = Rgba([color.0[0], color.0[1], color.0[2], 255]);
        RgbaImage::from_fn(w, h, |x, y| {
            if self.pixels.get_pixel(x, y).0[0] != UNPAINTED {
                painted
            } else {
                Rgba([0, 0, 0, 0])
            }
        })
    }
}

// ---------------------------------------------------------------------------
//  Screen → canvas mapping
// ---------------------------------------------------------------------------

/// On-screen placement of the editing canvas, displayed with "contain" fit
/// (uniform scale, centred, letterboxed on the slack axis).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CanvasLayout {
    /// Bounding rect of the canvas widget in screen space.
    pub screen_rect: Rect,
    pub canvas_w: u32,
    pub canvas_h: u32,
}

impl CanvasLayout {
    pub fn new(screen_rect: Rect, canvas_w: u32, canvas_h: u32) -> Self {
        Self {
            screen_rect,
            canvas_w,
            canvas_h,
        }
    }

    /// Screen pixels per canvas pixel.
    pub fn visual_scale(&self) -> f32 {
        if self.canvas_w == 0 || self.canvas_h == 0 {
            return 0.0;
        }
        (self.screen_rect.width() / self.canvas_w as f32)
            .min(self.screen_rect.height() / self.canvas_h as f32)
    }

    /// Size of the drawn canvas inside `screen_rect`.
    pub fn actual_size(&self) -> Vec2 {
        let s = self.visual_scale();
        Vec2::new(self.canvas_w as f32 * s, self.canvas_h as f32 * s)
    }

    /// Letterbox padding on each side.
    pub fn padding(&self) -> Vec2 {
        (self.screen_rect.size() - self.actual_size()) * 0.5
    }

    /// Map a client position to sub-pixel canvas coordinates.
    ///
    /// Returns `None` when the point falls in the letterbox padding or outside
    /// the widget; pointers leave the drawable area all the time, so this is
    /// not an error.
    pub fn to_canvas(&self, client: Pos2) -> Option<Pos2> {
        let actual = self.actual_size();
        if actual.x <= 0.0 || actual.y <= 0.0 {
            return None;
        }
        let local = client - self.screen_rect.min - self.padding();
        if local.x < 0.0 || local.y < 0.0 || local.x > actual.x || local.y > actual.y {
            return None;
        }
        Some(Pos2::new(
            local.x / actual.x * self.canvas_w as f32,
            local.y / actual.y * self.canvas_h as f32,
        ))
    }

    /// Like [`Self::to_canvas`] but floored to the pixel the pointer is over.
    pub fn to_canvas_pixel(&self, client: Pos2) -> Option<(i32, i32)> {
        self.to_canvas(client)
            .map(|p| (p.x.floor() as i32, p.y.floor() as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::pos2;

    #[test]
    fn edit_dimensions_round_up() {
        assert_eq!(edit_dimensions(1216, 832).unwrap(), (152, 104));
        assert_eq!(edit_dimensions(1000, 1001).unwrap(), (125, 126));
        assert!(edit_dimensions(0, 832).is_err());
    }

    #[test]
    fn wide_widget_letterboxes_left_and_right() {
        // 100x50 canvas in a 400x100 widget: scale 2, drawn 200x100, 100px each side
        let layout = CanvasLayout::new(
            Rect::from_min_size(pos2(10.0, 20.0), Vec2::new(400.0, 100.0)),
            100,
            50,
        );
        assert_eq!(layout.visual_scale(), 2.0);
        assert_eq!(layout.padding(), Vec2::new(100.0, 0.0));

        // Inside the padding
        assert_eq!(layout.to_canvas(pos2(50.0, 60.0)), None);
        // Left edge of the drawn canvas
        assert_eq!(layout.to_canvas(pos2(110.0, 20.0)), Some(pos2(0.0, 0.0)));
        // Far edge is inclusive
        assert_eq!(layout.to_canvas(pos2(310.0, 120.0)), Some(pos2(100.0, 50.0)));
        assert_eq!(layout.to_canvas_pixel(pos2(113.0, 25.0)), Some((1, 2)));
        assert_eq!(layout.to_canvas(pos2(310.5, 60.0)), None);
    }

    #[test]
    fn tall_widget_letterboxes_top_and_bottom() {
        let layout = CanvasLayout::new(
            Rect::from_min_size(pos2(0.0, 0.0), Vec2::new(152.0, 400.0)),
            152,
            104,
        );
        assert_eq!(layout.visual_scale(), 1.0);
        assert_eq!(layout.padding(), Vec2::new(0.0, 148.0));
        assert_eq!(layout.to_canvas(pos2(76.0, 100.0)), None);
        assert_eq!(layout.to_canvas_pixel(pos2(76.0, 200.0)), Some((76, 52)));
    }

    #[test]
    fn degenerate_layout_maps_nothing() {
        let layout = CanvasLayout::new(Rect::from_min_size(pos2(0.0, 0.0), Vec2::ZERO), 10, 10);
        assert_eq!(layout.to_canvas(pos2(0.0, 0.0)), None);
        let empty = CanvasLayout::new(
            Rect::from_min_size(pos2(0.0, 0.0), Vec2::new(10.0, 10.0)),
            0,
            10,
        );
        assert_eq!(empty.to_canvas(pos2(1.0, 1.0)), None);
    }

    #[test]
    fn buffer_writes_are_clipped() {
        let mut buf = MaskBuffer::new(4, 3).unwrap();
        buf.set(-1, 0, PAINTED);
        buf.set(4, 0, PAINTED);
        buf.set(3, 2, PAINTED);
        assert_eq!(buf.painted_count(), 1);
        assert!(buf.is_painted(3, 2));
        assert!(!buf.is_painted(-1, 0));
    }

    #[test]
    fn editing_form_classifies_by_alpha() {
        let mut buf = MaskBuffer::new(2, 1).unwrap();
        buf.set(1, 0, PAINTED);
        let rgba = buf.to_editing_rgba(Rgba([255, 0, 0, 255]));
        assert_eq!(rgba.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(rgba.get_pixel(1, 0).0, [255, 0, 0, 255]);
        assert_eq!(MaskBuffer::from_editing_rgba(&rgba), buf);
    }
}
