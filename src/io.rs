use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, RgbaImage};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::canvas::edit_dimensions;
use crate::error::MaskError;
use crate::ops::transform::BiasState;

/// Opaque pure black: unpainted.
pub const BLACK: [u8; 4] = [0, 0, 0, 255];
/// Opaque pure white: painted.
pub const WHITE: [u8; 4] = [255, 255, 255, 255];

const DATA_URL_SCHEME: &str = "data:image/";
const BASE64_MARKER: &str = ";base64,";

// ============================================================================
// WIRE MASKS
// ============================================================================

/// Canonical mask payload: editing resolution, every pixel opaque black or
/// opaque white.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressedMask {
    image: RgbaImage,
}

/// Full target-resolution mask, derived from a [`CompressedMask`] for preview.
/// Never authoritative.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayMask {
    image: RgbaImage,
}

macro_rules! binary_mask_impl {
    ($ty:ident) => {
        impl $ty {
            /// Wrap an image, rejecting anything that is not strictly two-level.
            pub fn from_binarized(image: RgbaImage) -> Result<Self, MaskError> {
                validate_two_level(&image)?;
                Ok(Self { image })
            }

            /// Codec output is binarized by construction.
            pub(crate) fn from_binarized_unchecked(image: RgbaImage) -> Self {
                debug_assert!(validate_two_level(&image).is_ok());
                Self { image }
            }

            pub fn width(&self) -> u32 {
                self.image.width()
            }

            pub fn height(&self) -> u32 {
                self.image.height()
            }

            pub fn dimensions(&self) -> (u32, u32) {
                self.image.dimensions()
            }

            pub fn as_rgba(&self) -> &RgbaImage {
                &self.image
            }

            pub fn into_rgba(self) -> RgbaImage {
                self.image
            }

            /// White pixel test; out-of-bounds reads as unpainted.
            pub fn is_painted(&self, x: u32, y: u32) -> bool {
                self.image
                    .get_pixel_checked(x, y)
                    .is_some_and(|p| p.0 == WHITE)
            }

            pub fn painted_count(&self) -> usize {
                self.image.pixels().filter(|p| p.0 == WHITE).count()
            }

            pub fn to_png(&self) -> Result<Vec<u8>, MaskError> {
                encode_png(&self.image)
            }

            pub fn from_png(bytes: &[u8]) -> Result<Self, MaskError> {
                Self::from_binarized(decode_image(bytes)?)
            }

            /// `data:image/png;base64,...`
            pub fn to_data_url(&self) -> Result<String, MaskError> {
                Ok(format!(
                    "{}png{}{}",
                    DATA_URL_SCHEME,
                    BASE64_MARKER,
                    STANDARD.encode(self.to_png()?)
                ))
            }

            pub fn from_data_url(url: &str) -> Result<Self, MaskError> {
                Self::from_png(&decode_data_url(url)?)
            }
        }
    };
}

binary_mask_impl!(CompressedMask);
binary_mask_impl!(DisplayMask);

impl CompressedMask {
    /// True when this mask has the editing size for the target resolution.
    pub fn fits_target(&self, target_w: u32, target_h: u32) -> bool {
        edit_dimensions(target_w, target_h).is_ok_and(|dims| dims == self.dimensions())
    }
}

/// Every pixel must be exactly opaque black or opaque white.
pub fn validate_two_level(image: &RgbaImage) -> Result<(), MaskError> {
    MaskError::check_dimensions(image.width(), image.height())?;
    match image
        .enumerate_pixels()
        .find(|(_, _, p)| p.0 != BLACK && p.0 != WHITE)
    {
        Some((x, y, p)) => Err(MaskError::UnsupportedMaskFormat(format!(
            "pixel ({}, {}) is {:?}, expected pure black or white",
            x, y, p.0
        ))),
        None => Ok(()),
    }
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, MaskError> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgba8,
    )?;
    Ok(out)
}

/// Decode any supported image container to RGBA.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, MaskError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| MaskError::ImageDecodeFailure(e.to_string()))?
        .into_rgba8();
    MaskError::check_dimensions(img.width(), img.height())?;
    Ok(img)
}

/// Strip a `data:image/*;base64,` header and decode the payload.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, MaskError> {
    let rest = url.trim().strip_prefix(DATA_URL_SCHEME).ok_or_else(|| {
        MaskError::UnsupportedMaskFormat("mask value is not an image data URL".into())
    })?;
    let (_, payload) = rest.split_once(BASE64_MARKER).ok_or_else(|| {
        MaskError::UnsupportedMaskFormat("image data URL is not base64-encoded".into())
    })?;
    STANDARD
        .decode(payload)
        .map_err(|e| MaskError::UnsupportedMaskFormat(format!("bad base64 payload: {}", e)))
}

/// Load an image file from disk as RGBA.
pub fn load_image_file(path: &Path) -> Result<RgbaImage, MaskError> {
    let mut bytes = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;
    decode_image(&bytes)
}

/// Write an RGBA image as PNG.
pub fn write_png_file(image: &RgbaImage, path: &Path) -> Result<(), MaskError> {
    let bytes = encode_png(image)?;
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

// ============================================================================
// IMR MASK RECORD FILE
// ============================================================================

/// Magic header for mask record files
const IMR_MAGIC_V1: &str = "IMR1";

/// Serializable record: compressed mask plus the bias it was authored under.
#[derive(Serialize, Deserialize)]
struct MaskRecordFileV1 {
    magic: String,
    target_w: u32,
    target_h: u32,
    mask_png: Vec<u8>,
    bias: Option<BiasState>,
}

/// A stored mask and the placement it is registered against.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskRecord {
    pub target_w: u32,
    pub target_h: u32,
    pub mask: CompressedMask,
    /// Bias of the source image when the mask was last aligned. `None` for
    /// masks that never went through realignment.
    pub bias: Option<BiasState>,
}

impl MaskRecord {
    pub fn new(
        target_w: u32,
        target_h: u32,
        mask: CompressedMask,
        bias: Option<BiasState>,
    ) -> Result<Self, MaskError> {
        if !mask.fits_target(target_w, target_h) {
            return Err(MaskError::UnsupportedMaskFormat(format!(
                "{}x{} mask does not match target {}x{}",
                mask.width(),
                mask.height(),
                target_w,
                target_h
            )));
        }
        Ok(Self {
            target_w,
            target_h,
            mask,
            bias,
        })
    }
}

pub fn encode_mask_record(record: &MaskRecord) -> Result<Vec<u8>, MaskError> {
    let file = MaskRecordFileV1 {
        magic: IMR_MAGIC_V1.to_string(),
        target_w: record.target_w,
        target_h: record.target_h,
        mask_png: record.mask.to_png()?,
        bias: record.bias,
    };
    Ok(bincode::serialize(&file)?)
}

pub fn decode_mask_record(raw: &[u8]) -> Result<MaskRecord, MaskError> {
    let file: MaskRecordFileV1 = bincode::deserialize(raw)?;
    if file.magic != IMR_MAGIC_V1 {
        return Err(MaskError::UnsupportedMaskFormat(format!(
            "Unknown record header '{}'",
            file.magic
        )));
    }
    let mask = CompressedMask::from_png(&file.mask_png)?;
    MaskRecord::new(file.target_w, file.target_h, mask, file.bias)
}

pub fn save_mask_record(record: &MaskRecord, path: &Path) -> Result<(), MaskError> {
    let bytes = encode_mask_record(record)?;
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

pub fn load_mask_record(path: &Path) -> Result<MaskRecord, MaskError> {
    let mut raw = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut raw)?;
    decode_mask_record(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::transform::BiasTransform;
    use image::Rgba;

    fn checker(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            if (x + y) % 2 == 0 { Rgba(WHITE) } else { Rgba(BLACK) }
        })
    }

    #[test]
    fn grey_pixels_are_rejected() {
        let mut img = checker(4, 4);
        img.put_pixel(2, 1, Rgba([128, 128, 128, 255]));
        let err = CompressedMask::from_binarized(img).unwrap_err();
        assert!(matches!(err, MaskError::UnsupportedMaskFormat(_)));
    }

    #[test]
    fn translucent_white_is_rejected() {
        let mut img = checker(2, 2);
        img.put_pixel(0, 0, Rgba([255, 255, 255, 10]));
        assert!(validate_two_level(&img).is_err());
    }

    #[test]
    fn data_url_survives_transport() {
        let mask = CompressedMask::from_binarized(checker(5, 3)).unwrap();
        let url = mask.to_data_url().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(CompressedMask::from_data_url(&url).unwrap(), mask);
    }

    #[test]
    fn non_image_values_are_unsupported() {
        let err = CompressedMask::from_data_url("https://example.invalid/mask.png").unwrap_err();
        assert!(matches!(err, MaskError::UnsupportedMaskFormat(_)));
        let err = CompressedMask::from_data_url("data:image/png;base64,@@@").unwrap_err();
        assert!(matches!(err, MaskError::UnsupportedMaskFormat(_)));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = CompressedMask::from_png(b"not a png").unwrap_err();
        assert!(matches!(err, MaskError::ImageDecodeFailure(_)));
    }

    #[test]
    fn record_keeps_bias_and_mask() {
        let mask = CompressedMask::from_binarized(checker(152, 104)).unwrap();
        let bias = BiasState::Transform(BiasTransform {
            x: 12.0,
            y: -3.0,
            rotate: 15.0,
            scale: 1.25,
        });
        let record = MaskRecord::new(1216, 832, mask, Some(bias)).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.imr");
        save_mask_record(&record, &path).unwrap();
        assert_eq!(load_mask_record(&path).unwrap(), record);
    }

    #[test]
    fn record_rejects_mismatched_target() {
        let mask = CompressedMask::from_binarized(checker(10, 10)).unwrap();
        assert!(MaskRecord::new(1216, 832, mask, None).is_err());
    }

    #[test]
    fn record_rejects_foreign_magic() {
        let file = MaskRecordFileV1 {
            magic: "PFE1".into(),
            target_w: 8,
            target_h: 8,
            mask_png: Vec::new(),
            bias: None,
        };
        let raw = bincode::serialize(&file).unwrap();
        assert!(matches!(
            decode_mask_record(&raw),
            Err(MaskError::UnsupportedMaskFormat(_))
        ));
    }
}
