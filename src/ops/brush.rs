// ============================================================================
// RASTER BRUSH: hard-edged circle / square stamps into the mask buffer
// ============================================================================
//
// No blending and no anti-aliasing: every stamped cell is fully painted or
// fully cleared, so the buffer always binarizes cleanly.

use crate::canvas::{MaskBuffer, PAINTED, UNPAINTED};
use crate::error::MaskError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BrushShape {
    #[default]
    Circle,
    Square,
}

impl BrushShape {
    pub fn label(&self) -> &'static str {
        match self {
            BrushShape::Circle => "Circle",
            BrushShape::Square => "Square",
        }
    }

    pub fn all() -> &'static [BrushShape] {
        &[BrushShape::Circle, BrushShape::Square]
    }
}

/// Cell offsets of a radius-`r` disc stamp, relative to its centre.
///
/// A cell at `(j, i)` in the first quadrant is kept when the nearer of its
/// two diagonal corners, `(j+0.5, i+0.5)` or `(j-0.5, i-0.5)`, lies within
/// `r`; kept cells are mirrored into all four quadrants.
pub fn circle_offsets(r: u32) -> Vec<(i32, i32)> {
    let r = r as i32;
    let rf = r as f32;
    let mut cells = Vec::new();
    for i in 0..=r {
        for j in 0..=r {
            let (fj, fi) = (j as f32, i as f32);
            let outer = ((fj + 0.5).powi(2) + (fi + 0.5).powi(2)).sqrt();
            let inner = ((fj - 0.5).powi(2) + (fi - 0.5).powi(2)).sqrt();
            if outer.min(inner) > rf {
                continue;
            }
            cells.push((j, i));
            if j != 0 {
                cells.push((-j, i));
            }
            if i != 0 {
                cells.push((j, -i));
                if j != 0 {
                    cells.push((-j, -i));
                }
            }
        }
    }
    cells
}

/// Stamp a disc of radius `r` centred on `(cx, cy)`.
pub fn paint_circle(buf: &mut MaskBuffer, cx: i32, cy: i32, r: u32, value: u8) {
    for (dx, dy) in circle_offsets(r) {
        buf.set(cx + dx, cy + dy, value);
    }
}

/// Fill a `size × size` square whose top-left is `floor(size/2)` up and left
/// of the centre.
pub fn paint_square(buf: &mut MaskBuffer, cx: i32, cy: i32, size: u32, value: u8) {
    let size = size as i32;
    let x0 = cx - size / 2;
    let y0 = cy - size / 2;
    for y in y0..y0 + size {
        for x in x0..x0 + size {
            buf.set(x, y, value);
        }
    }
}

/// One brush dab. `brush_size` is the radius of a circle; a square spans
/// `2 × brush_size` so both shapes cover the same extent.
pub fn stamp(buf: &mut MaskBuffer, shape: BrushShape, cx: i32, cy: i32, brush_size: u32, erase: bool) {
    let value = if erase { UNPAINTED } else { PAINTED };
    match shape {
        BrushShape::Circle => paint_circle(buf, cx, cy, brush_size, value),
        BrushShape::Square => paint_square(buf, cx, cy, brush_size * 2, value),
    }
}

/// Cursor preview layer, kept apart from the live mask.
///
/// Cleared on every pointer move and on pointer-leave, so it only ever shows
/// the footprint under the cursor.
#[derive(Clone, Debug)]
pub struct PreviewOverlay {
    footprint: MaskBuffer,
    /// Whether the footprint belongs to the eraser (drawn differently by the UI).
    pub erase: bool,
    visible: bool,
}

impl PreviewOverlay {
    pub fn new(width: u32, height: u32) -> Result<Self, MaskError> {
        Ok(Self {
            footprint: MaskBuffer::new(width, height)?,
            erase: false,
            visible: false,
        })
    }

    pub fn clear(&mut self) {
        if self.visible {
            self.footprint.clear();
            self.visible = false;
        }
    }

    pub fn preview_circle(&mut self, cx: i32, cy: i32, r: u32, erase: bool) {
        self.clear();
        paint_circle(&mut self.footprint, cx, cy, r, PAINTED);
        self.erase = erase;
        self.visible = true;
    }

    pub fn preview_square(&mut self, cx: i32, cy: i32, size: u32, erase: bool) {
        self.clear();
        paint_square(&mut self.footprint, cx, cy, size, PAINTED);
        self.erase = erase;
        self.visible = true;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn footprint(&self) -> &MaskBuffer {
        &self.footprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn painted_set(buf: &MaskBuffer) -> Vec<(i32, i32)> {
        let mut out = Vec::new();
        for y in 0..buf.height() as i32 {
            for x in 0..buf.width() as i32 {
                if buf.is_painted(x, y) {
                    out.push((x, y));
                }
            }
        }
        out
    }

    #[test]
    fn circle_is_symmetric_about_both_axes() {
        for r in 1..=10u32 {
            let mut buf = MaskBuffer::new(41, 41).unwrap();
            paint_circle(&mut buf, 20, 20, r, PAINTED);
            for (x, y) in painted_set(&buf) {
                assert!(buf.is_painted(40 - x, y), "r={r} ({x},{y}) not mirrored in x");
                assert!(buf.is_painted(x, 40 - y), "r={r} ({x},{y}) not mirrored in y");
            }
        }
    }

    #[test]
    fn offsets_have_no_duplicates() {
        let mut cells = circle_offsets(5);
        let n = cells.len();
        cells.sort();
        cells.dedup();
        assert_eq!(cells.len(), n);
    }

    #[test]
    fn radius_one_fills_a_three_by_three_block() {
        // (1,1): inner corner (0.5, 0.5) is at 0.707 <= 1, so corners are in
        let mut cells = circle_offsets(1);
        cells.sort();
        assert_eq!(
            cells,
            vec![(-1, -1), (-1, 0), (-1, 1), (0, -1), (0, 0), (0, 1), (1, -1), (1, 0), (1, 1)]
        );
    }

    #[test]
    fn disc_stays_within_radius_bounds() {
        let r = 5;
        for (dx, dy) in circle_offsets(r) {
            assert!(dx.abs() <= r as i32 && dy.abs() <= r as i32);
            // Kept cells have a corner inside the radius
            let near = ((dx.abs() as f32 - 0.5).powi(2) + (dy.abs() as f32 - 0.5).powi(2)).sqrt();
            assert!(near <= r as f32);
        }
        // The axis tips are included, the far corners are not
        let cells = circle_offsets(r);
        assert!(cells.contains(&(5, 0)) && cells.contains(&(0, -5)));
        assert!(!cells.contains(&(5, 5)));
    }

    #[test]
    fn square_is_centred_by_floor_offset() {
        let mut buf = MaskBuffer::new(20, 20).unwrap();
        stamp(&mut buf, BrushShape::Square, 10, 10, 2, false);
        // size 4, top-left (8, 8)
        assert_eq!(buf.painted_count(), 16);
        assert!(buf.is_painted(8, 8) && buf.is_painted(11, 11));
        assert!(!buf.is_painted(12, 12) && !buf.is_painted(7, 8));
    }

    #[test]
    fn stamps_clip_at_the_edges() {
        let mut buf = MaskBuffer::new(10, 10).unwrap();
        stamp(&mut buf, BrushShape::Circle, 0, 0, 3, false);
        assert!(buf.is_painted(0, 0));
        assert!(buf.painted_count() < circle_offsets(3).len());
    }

    #[test]
    fn eraser_clears_painted_cells() {
        let mut buf = MaskBuffer::new(16, 16).unwrap();
        stamp(&mut buf, BrushShape::Square, 8, 8, 4, false);
        stamp(&mut buf, BrushShape::Circle, 8, 8, 2, true);
        assert!(!buf.is_painted(8, 8));
        assert!(buf.is_painted(4, 4));
    }

    #[test]
    fn preview_replaces_previous_footprint() {
        let mut overlay = PreviewOverlay::new(30, 30).unwrap();
        overlay.preview_circle(5, 5, 2, false);
        let first = overlay.footprint().painted_count();
        overlay.preview_circle(20, 20, 2, true);
        assert_eq!(overlay.footprint().painted_count(), first);
        assert!(!overlay.footprint().is_painted(5, 5));
        assert!(overlay.erase);
        overlay.clear();
        assert!(!overlay.is_visible());
        assert!(overlay.footprint().is_blank());
    }
}
