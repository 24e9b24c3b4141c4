// ============================================================================
// BIAS REALIGNMENT: keep a mask registered to its image when the crop moves
// ============================================================================

use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::MaskError;
use crate::io::{BLACK, CompressedMask, MaskRecord};
use crate::ops::codec::{encode_compressed, upscale_for_display};
use crate::{log_info, log_warn};

/// Highest legacy anchor value (0 = start edge, 2 = centre, 4 = end edge).
pub const MAX_ANCHOR: u8 = 4;

/// Free placement of a source image inside the target frame.
/// `rotate` is in degrees, `scale` is multiplicative (1.0 = fitted size).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BiasTransform {
    pub x: f32,
    pub y: f32,
    pub rotate: f32,
    pub scale: f32,
}

impl Default for BiasTransform {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            rotate: 0.0,
            scale: 1.0,
        }
    }
}

/// How a source image is cropped/placed into the target frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum BiasState {
    /// Legacy: one of five discrete crop positions along the overflowing axis.
    Anchor(u8),
    Transform(BiasTransform),
}

impl BiasState {
    pub fn validate(&self) -> Result<(), MaskError> {
        match *self {
            BiasState::Anchor(a) if a > MAX_ANCHOR => Err(MaskError::InvalidBias(format!(
                "anchor {} outside 0..={}",
                a, MAX_ANCHOR
            ))),
            BiasState::Transform(t) if !(t.scale > 0.0) || !t.scale.is_finite() => Err(
                MaskError::InvalidBias(format!("scale must be positive, got {}", t.scale)),
            ),
            BiasState::Transform(t)
                if !(t.x.is_finite() && t.y.is_finite() && t.rotate.is_finite()) =>
            {
                Err(MaskError::InvalidBias("non-finite offset or rotation".into()))
            }
            _ => Ok(()),
        }
    }

    /// Express this bias as a free transform of the unbiased placement.
    /// A legacy anchor is a pure translation along the overflowing axis.
    pub fn to_transform(&self, image: (u32, u32), target: (u32, u32)) -> Result<BiasTransform, MaskError> {
        match *self {
            BiasState::Transform(t) => Ok(t),
            BiasState::Anchor(_) => {
                let rect = placement_rect(*self, image, target)?;
                Ok(BiasTransform {
                    x: rect.x,
                    y: rect.y,
                    ..BiasTransform::default()
                })
            }
        }
    }
}

/// `"2"` for a legacy anchor, `"x,y,rotate,scale"` for a transform.
impl FromStr for BiasState {
    type Err = MaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bias = if s.contains(',') {
            let parts: Vec<f32> = s
                .split(',')
                .map(|p| p.trim().parse::<f32>())
                .collect::<Result<_, _>>()
                .map_err(|e| MaskError::InvalidBias(format!("'{}': {}", s, e)))?;
            let [x, y, rotate, scale] = parts[..] else {
                return Err(MaskError::InvalidBias(format!(
                    "'{}': expected x,y,rotate,scale",
                    s
                )));
            };
            BiasState::Transform(BiasTransform { x, y, rotate, scale })
        } else {
            let anchor = s
                .parse::<u8>()
                .map_err(|e| MaskError::InvalidBias(format!("'{}': {}", s, e)))?;
            BiasState::Anchor(anchor)
        };
        bias.validate()?;
        Ok(bias)
    }
}

// ---------------------------------------------------------------------------
//  Placement
// ---------------------------------------------------------------------------

/// Axis-aligned rectangle of the (unrotated) source image in target space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlacementRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// Unbiased placement: cover-fit anchored at the frame origin. A wider image
/// fits the target height and overflows left/right; otherwise it fits the
/// width and overflows top/bottom.
pub fn base_placement(image: (u32, u32), target: (u32, u32)) -> Result<PlacementRect, MaskError> {
    MaskError::check_dimensions(image.0, image.1)?;
    MaskError::check_dimensions(target.0, target.1)?;
    let (iw, ih) = (image.0 as f32, image.1 as f32);
    let (tw, th) = (target.0 as f32, target.1 as f32);
    let (w, h) = if iw / ih > tw / th {
        (iw * th / ih, th)
    } else {
        (tw, ih * tw / iw)
    };
    Ok(PlacementRect { x: 0.0, y: 0.0, w, h })
}

/// Placement of the source image under `bias`.
pub fn placement_rect(
    bias: BiasState,
    image: (u32, u32),
    target: (u32, u32),
) -> Result<PlacementRect, MaskError> {
    bias.validate()?;
    let base = base_placement(image, target)?;
    let rect = match bias {
        BiasState::Anchor(a) => {
            let t = a as f32 / MAX_ANCHOR as f32;
            PlacementRect {
                x: -(base.w - target.0 as f32).max(0.0) * t,
                y: -(base.h - target.1 as f32).max(0.0) * t,
                ..base
            }
        }
        BiasState::Transform(t) => PlacementRect {
            x: base.x + t.x,
            y: base.y + t.y,
            w: base.w * t.scale,
            h: base.h * t.scale,
        },
    };
    if !(rect.w > 0.0 && rect.h > 0.0 && rect.x.is_finite() && rect.y.is_finite()) {
        return Err(MaskError::InvalidBias(format!(
            "placement could not be recovered: {:?}",
            rect
        )));
    }
    Ok(rect)
}

// ---------------------------------------------------------------------------
//  Affine helpers
// ---------------------------------------------------------------------------

type Mat3 = [[f32; 3]; 3];

const IDENTITY: Mat3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

fn mul_3x3(a: Mat3, b: Mat3) -> Mat3 {
    let mut out = [[0.0f32; 3]; 3];
    for (r, row) in out.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[r][k] * b[k][c]).sum();
        }
    }
    out
}

/// `translate(tx, ty) · rotate(radians) · scale(s)`: a point is scaled first,
/// then rotated, then translated. This is the order the crop transform is
/// applied to the source image; any other order drifts.
fn translate_rotate_scale(tx: f32, ty: f32, radians: f32, s: f32) -> Mat3 {
    let (sin, cos) = radians.sin_cos();
    let translate = [[1.0, 0.0, tx], [0.0, 1.0, ty], [0.0, 0.0, 1.0]];
    let rotate = [[cos, -sin, 0.0], [sin, cos, 0.0], [0.0, 0.0, 1.0]];
    let scale = [[s, 0.0, 0.0], [0.0, s, 0.0], [0.0, 0.0, 1.0]];
    mul_3x3(mul_3x3(translate, rotate), scale)
}

/// Invert a 3×3 matrix. `None` on singular input.
fn invert_3x3(m: Mat3) -> Option<Mat3> {
    let (a, b, c) = (m[0][0], m[0][1], m[0][2]);
    let (d, e, f) = (m[1][0], m[1][1], m[1][2]);
    let (g, h, i) = (m[2][0], m[2][1], m[2][2]);

    let det = a * (e * i - f * h) - b * (d * i - f * g) + c * (d * h - e * g);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv = 1.0 / det;
    Some([
        [(e * i - f * h) * inv, (c * h - b * i) * inv, (b * f - c * e) * inv],
        [(f * g - d * i) * inv, (a * i - c * g) * inv, (c * d - a * f) * inv],
        [(d * h - e * g) * inv, (b * g - a * h) * inv, (a * e - b * d) * inv],
    ])
}

/// Transform that moves content registered under `from` to where it belongs
/// under `to`. With no `from`, the absolute `to` transform is used.
pub fn realignment_matrix(
    from: Option<BiasState>,
    to: BiasState,
    image: (u32, u32),
    target: (u32, u32),
) -> Result<[[f32; 3]; 3], MaskError> {
    let to_rect = placement_rect(to, image, target)?;
    let Some(from) = from else {
        let t = to.to_transform(image, target)?;
        return Ok(translate_rotate_scale(t.x, t.y, t.rotate.to_radians(), t.scale));
    };
    let from_rect = placement_rect(from, image, target)?;

    match (from, to) {
        (BiasState::Anchor(_), BiasState::Anchor(_)) => {
            // Translate + scale that carries one crop rectangle onto the other
            let s = to_rect.w / from_rect.w;
            Ok(translate_rotate_scale(
                to_rect.x - from_rect.x * s,
                to_rect.y - from_rect.y * s,
                0.0,
                s,
            ))
        }
        _ => {
            let t0 = from.to_transform(image, target)?;
            let t1 = to.to_transform(image, target)?;
            Ok(translate_rotate_scale(
                t1.x - t0.x,
                t1.y - t0.y,
                (t1.rotate - t0.rotate).to_radians(),
                t1.scale / t0.scale,
            ))
        }
    }
}

/// Redraw `src` under `forward` onto an unpainted `out_w × out_h` surface.
/// Each destination pixel centre is mapped back through the inverse and
/// sampled nearest-neighbour.
fn warp_nearest(src: &RgbaImage, forward: Mat3, out_w: u32, out_h: u32) -> Result<RgbaImage, MaskError> {
    let inv = invert_3x3(forward)
        .ok_or_else(|| MaskError::InvalidBias("realignment transform is singular".into()))?;
    let (h00, h01, h02) = (inv[0][0], inv[0][1], inv[0][2]);
    let (h10, h11, h12) = (inv[1][0], inv[1][1], inv[1][2]);

    let src_w = src.width() as i64;
    let src_h = src.height() as i64;
    let src_stride = src_w as usize * 4;
    let src_raw = src.as_raw();

    let mut dst = RgbaImage::new(out_w, out_h);
    let row_bytes = out_w as usize * 4;
    dst.as_mut()
        .par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(dy, row)| {
            let v = dy as f32 + 0.5;
            let base_x = h01 * v + h02;
            let base_y = h11 * v + h12;
            for dx in 0..out_w as usize {
                let u = dx as f32 + 0.5;
                let sx = (h00 * u + base_x).floor() as i64;
                let sy = (h10 * u + base_y).floor() as i64;
                let px = &mut row[dx * 4..dx * 4 + 4];
                if sx < 0 || sy < 0 || sx >= src_w || sy >= src_h {
                    px.copy_from_slice(&BLACK);
                } else {
                    let si = sy as usize * src_stride + sx as usize * 4;
                    px.copy_from_slice(&src_raw[si..si + 4]);
                }
            }
        });
    Ok(dst)
}

/// Re-register `mask` from bias `from` to bias `to`.
///
/// Returns a new compressed mask; on any error the caller keeps the old one.
pub fn realign_mask(
    mask: &CompressedMask,
    from: Option<BiasState>,
    to: BiasState,
    image: (u32, u32),
    target: (u32, u32),
) -> Result<CompressedMask, MaskError> {
    let (tw, th) = target;
    MaskError::check_dimensions(tw, th)?;
    MaskError::check_dimensions(image.0, image.1)?;

    let forward = match realignment_matrix(from, to, image, target) {
        Ok(m) => m,
        Err(e) => {
            log_warn!("Mask realignment aborted: {}", e);
            return Err(e);
        }
    };
    if from.is_some() && forward == IDENTITY {
        return Ok(mask.clone());
    }

    let full = upscale_for_display(mask, tw, th)?;
    let warped = warp_nearest(full.as_rgba(), forward, tw, th)?;
    let realigned = encode_compressed(&warped, tw, th)?;
    log_info!(
        "Realigned mask {:?} -> {:?} ({} -> {} painted cells)",
        from,
        to,
        mask.painted_count(),
        realigned.painted_count()
    );
    Ok(realigned)
}

/// Realign a stored record to `to`, using its recorded bias as the origin.
pub fn realign_record(record: &MaskRecord, to: BiasState, image: (u32, u32)) -> Result<MaskRecord, MaskError> {
    let mask = realign_mask(
        &record.mask,
        record.bias,
        to,
        image,
        (record.target_w, record.target_h),
    )?;
    MaskRecord::new(record.target_w, record.target_h, mask, Some(to))
}
