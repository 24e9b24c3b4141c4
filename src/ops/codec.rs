// ============================================================================
// MASK CODEC: binarize / resample between the edit buffer and wire masks
// ============================================================================
//
// Every resample here is nearest-neighbour. Any blending would create grey
// fringes, and the wire formats only admit pure black and pure white.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::{MaskBuffer, PAINTED, UNPAINTED, edit_dimensions};
use crate::error::MaskError;
use crate::io::{BLACK, CompressedMask, DisplayMask, WHITE, decode_image};
use crate::{log_info, log_warn};

/// Preview tint for painted pixels.
pub const OVERLAY_RGB: [u8; 3] = [149, 254, 108];
/// Default preview opacity for painted pixels.
pub const DEFAULT_OVERLAY_ALPHA: f32 = 0.78;

// -- Resampling ------------------------------------------------------------

/// Source index for each destination column/row: the source pixel whose
/// span contains the destination pixel centre.
fn nearest_index_table(src_len: u32, dst_len: u32) -> Vec<u32> {
    let ratio = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|d| (((d as f64 + 0.5) * ratio).floor() as u32).min(src_len - 1))
        .collect()
}

/// Nearest-neighbour resize. No smoothing of any kind.
pub fn resample_nearest(src: &RgbaImage, out_w: u32, out_h: u32) -> Result<RgbaImage, MaskError> {
    MaskError::check_dimensions(src.width(), src.height())?;
    MaskError::check_dimensions(out_w, out_h)?;
    if src.dimensions() == (out_w, out_h) {
        return Ok(src.clone());
    }

    let xs = nearest_index_table(src.width(), out_w);
    let ys = nearest_index_table(src.height(), out_h);
    let src_stride = src.width() as usize * 4;
    let src_raw = src.as_raw();

    let mut dst = RgbaImage::new(out_w, out_h);
    let row_bytes = out_w as usize * 4;
    dst.as_mut()
        .par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(dy, row)| {
            let src_row = ys[dy] as usize * src_stride;
            for (dx, &sx) in xs.iter().enumerate() {
                let si = src_row + sx as usize * 4;
                row[dx * 4..dx * 4 + 4].copy_from_slice(&src_raw[si..si + 4]);
            }
        });
    Ok(dst)
}

// -- Binarization ------------------------------------------------------------

/// Flatten onto opaque black (source-over), as drawing onto a black-filled
/// surface does.
pub fn composite_over_black(img: &mut RgbaImage) {
    img.as_mut().par_chunks_mut(4).for_each(|px| {
        let a = px[3] as u32;
        for c in &mut px[..3] {
            *c = ((*c as u32 * a + 127) / 255) as u8;
        }
        px[3] = 255;
    });
}

/// Any non-zero colour channel → opaque white, otherwise opaque black.
/// Alpha does not take part in the decision.
pub fn binarize(img: &mut RgbaImage) {
    img.as_mut().par_chunks_mut(4).for_each(|px| {
        let out = if px[0] | px[1] | px[2] != 0 { WHITE } else { BLACK };
        px.copy_from_slice(&out);
    });
}

/// Draw `source` scaled to `out_w × out_h` onto black, nearest-neighbour,
/// then binarize. The result holds only pure black and pure white.
pub fn encode_binarized(source: &RgbaImage, out_w: u32, out_h: u32) -> Result<RgbaImage, MaskError> {
    let mut out = resample_nearest(source, out_w, out_h)?;
    composite_over_black(&mut out);
    binarize(&mut out);
    Ok(out)
}

/// Encode at editing resolution for `target_w × target_h`: the canonical
/// payload.
pub fn encode_compressed(
    source: &RgbaImage,
    target_w: u32,
    target_h: u32,
) -> Result<CompressedMask, MaskError> {
    let (ew, eh) = edit_dimensions(target_w, target_h)?;
    Ok(CompressedMask::from_binarized_unchecked(encode_binarized(
        source, ew, eh,
    )?))
}

/// Encode at full target resolution for preview compositing.
pub fn encode_display(
    source: &RgbaImage,
    target_w: u32,
    target_h: u32,
) -> Result<DisplayMask, MaskError> {
    Ok(DisplayMask::from_binarized_unchecked(encode_binarized(
        source, target_w, target_h,
    )?))
}

/// Same pipeline as [`encode_display`], fed from a compressed mask.
pub fn upscale_for_display(
    compressed: &CompressedMask,
    target_w: u32,
    target_h: u32,
) -> Result<DisplayMask, MaskError> {
    encode_display(compressed.as_rgba(), target_w, target_h)
}

/// Decode a compressed mask into an edit buffer: pure black → unpainted,
/// anything else → painted.
pub fn decode_for_editing(
    compressed: &CompressedMask,
    edit_w: u32,
    edit_h: u32,
) -> Result<MaskBuffer, MaskError> {
    let scaled = resample_nearest(compressed.as_rgba(), edit_w, edit_h)?;
    let gray = image::GrayImage::from_fn(edit_w, edit_h, |x, y| {
        let p = scaled.get_pixel(x, y).0;
        if p[0] | p[1] | p[2] == 0 {
            image::Luma([UNPAINTED])
        } else {
            image::Luma([PAINTED])
        }
    });
    Ok(MaskBuffer::from_gray(gray))
}

/// Swap painted and unpainted.
pub fn invert_mask(mask: &CompressedMask) -> CompressedMask {
    let mut img = mask.as_rgba().clone();
    img.as_mut().par_chunks_mut(4).for_each(|px| {
        let out = if px[..4] == WHITE { BLACK } else { WHITE };
        px.copy_from_slice(&out);
    });
    CompressedMask::from_binarized_unchecked(img)
}

/// Presentation-only overlay: painted → translucent green, the rest
/// transparent. Never feed this back into a mask.
pub fn preview_overlay(display: &DisplayMask, alpha: f32) -> RgbaImage {
    let a = (alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
    let tint = Rgba([OVERLAY_RGB[0], OVERLAY_RGB[1], OVERLAY_RGB[2], a]);
    let src = display.as_rgba();
    let mut out = RgbaImage::new(src.width(), src.height());
    out.as_mut()
        .par_chunks_mut(4)
        .zip(src.as_raw().par_chunks(4))
        .for_each(|(dst, px)| {
            if px == WHITE {
                dst.copy_from_slice(&tint.0);
            }
        });
    out
}

/// Convert a pre-compression full-resolution mask (any RGBA encoding) into a
/// compressed mask for `target_w × target_h`.
///
/// Failures are logged and yield `None`; callers carry on with whatever
/// primary mask they have.
pub fn upgrade_legacy_mask(bytes: &[u8], target_w: u32, target_h: u32) -> Option<CompressedMask> {
    let legacy = match decode_image(bytes) {
        Ok(img) => img,
        Err(e) => {
            log_warn!("Legacy mask upgrade skipped: {}", e);
            return None;
        }
    };
    if legacy.dimensions() != (target_w, target_h) {
        log_warn!(
            "Legacy mask is {}x{}, target is {}x{}; resampling anyway",
            legacy.width(),
            legacy.height(),
            target_w,
            target_h
        );
    }
    match encode_compressed(&legacy, target_w, target_h) {
        Ok(mask) => {
            log_info!(
                "Upgraded legacy mask to {}x{} compressed form",
                mask.width(),
                mask.height()
            );
            Some(mask)
        }
        Err(e) => {
            log_warn!("Legacy mask upgrade skipped: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::encode_png;

    fn two_level(w: u32, h: u32, painted: impl Fn(u32, u32) -> bool) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            if painted(x, y) { Rgba(WHITE) } else { Rgba(BLACK) }
        })
    }

    #[test]
    fn binarization_is_idempotent_at_same_size() {
        let img = two_level(13, 7, |x, y| (x * 3 + y) % 5 == 0);
        let encoded = encode_binarized(&img, 13, 7).unwrap();
        assert_eq!(encoded, img);
    }

    #[test]
    fn any_colour_channel_counts_as_painted() {
        let mut img = RgbaImage::new(4, 1);
        img.put_pixel(0, 0, Rgba([0, 0, 1, 255]));
        img.put_pixel(1, 0, Rgba([200, 0, 0, 255]));
        img.put_pixel(2, 0, Rgba([0, 0, 0, 255]));
        img.put_pixel(3, 0, Rgba([255, 255, 255, 0]));
        let out = encode_binarized(&img, 4, 1).unwrap();
        assert_eq!(out.get_pixel(0, 0).0, WHITE);
        assert_eq!(out.get_pixel(1, 0).0, WHITE);
        assert_eq!(out.get_pixel(2, 0).0, BLACK);
        // Fully transparent paint lands on black
        assert_eq!(out.get_pixel(3, 0).0, BLACK);
    }

    #[test]
    fn decode_inverts_encode_without_resize() {
        let mut buf = MaskBuffer::new(20, 11).unwrap();
        for (x, y) in [(0, 0), (19, 10), (7, 3), (8, 3), (7, 4)] {
            buf.set(x, y, PAINTED);
        }
        let editing = buf.to_editing_rgba(Rgba([255, 64, 64, 255]));
        let encoded = CompressedMask::from_binarized(encode_binarized(&editing, 20, 11).unwrap()).unwrap();
        let decoded = decode_for_editing(&encoded, 20, 11).unwrap();
        assert_eq!(decoded, buf);
    }

    #[test]
    fn upscale_is_block_quantized() {
        let compressed = CompressedMask::from_binarized(two_level(5, 4, |x, y| (x + 2 * y) % 3 == 0)).unwrap();
        let display = upscale_for_display(&compressed, 40, 32).unwrap();
        for y in 0..32 {
            for x in 0..40 {
                assert_eq!(
                    display.is_painted(x, y),
                    compressed.is_painted(x / 8, y / 8),
                    "pixel ({x}, {y})"
                );
            }
        }
    }

    #[test]
    fn downscale_then_upscale_matches_blocks_for_ragged_targets() {
        // 1001 isn't a multiple of 8: the last block is short
        let full = two_level(1001, 17, |x, _| x >= 500);
        let compressed = encode_compressed(&full, 1001, 17).unwrap();
        assert_eq!(compressed.dimensions(), (126, 3));
        let display = upscale_for_display(&compressed, 1001, 17).unwrap();
        assert_eq!(display.dimensions(), (1001, 17));
        assert!(display.as_rgba().pixels().all(|p| p.0 == WHITE || p.0 == BLACK));
    }

    #[test]
    fn invert_is_an_involution() {
        let mask = CompressedMask::from_binarized(two_level(9, 9, |x, y| x * y % 4 == 1)).unwrap();
        let once = invert_mask(&mask);
        assert_ne!(once, mask);
        assert_eq!(once.painted_count(), 81 - mask.painted_count());
        assert_eq!(invert_mask(&once), mask);
    }

    #[test]
    fn overlay_tints_only_painted_pixels() {
        let display = DisplayMask::from_binarized(two_level(2, 1, |x, _| x == 1)).unwrap();
        let overlay = preview_overlay(&display, DEFAULT_OVERLAY_ALPHA);
        assert_eq!(overlay.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(overlay.get_pixel(1, 0).0, [149, 254, 108, 199]);
    }

    #[test]
    fn zero_sized_targets_are_rejected() {
        let img = two_level(4, 4, |_, _| true);
        assert!(matches!(
            encode_binarized(&img, 0, 4),
            Err(MaskError::InvalidDimensions { .. })
        ));
        assert!(encode_compressed(&img, 4, 0).is_err());
    }

    #[test]
    fn legacy_masks_upgrade_or_skip() {
        let legacy = two_level(64, 32, |x, y| x < 16 && y < 8);
        let bytes = encode_png(&legacy).unwrap();
        let upgraded = upgrade_legacy_mask(&bytes, 64, 32).unwrap();
        assert_eq!(upgraded.dimensions(), (8, 4));
        assert_eq!(upgraded.painted_count(), 2);

        assert!(upgrade_legacy_mask(b"\x89PNG truncated", 64, 32).is_none());
    }
}
