use std::fmt;

/// Error type for mask codec, realignment and record operations.
///
/// A failed operation never writes a partial mask: callers keep whatever
/// compressed mask they already had and surface the message.
#[derive(Debug)]
pub enum MaskError {
    /// A width or height of zero was passed to some stage of the pipeline.
    InvalidDimensions { width: u32, height: u32 },
    /// A mask or source image could not be decoded.
    ImageDecodeFailure(String),
    /// The value decoded, but is not a valid two-level mask encoding.
    UnsupportedMaskFormat(String),
    /// Bias parameters that cannot describe a placement (scale <= 0, anchor > 4).
    InvalidBias(String),
    /// A background mask job panicked before producing a result.
    Worker(String),
    Io(std::io::Error),
    Serialize(String),
}

impl MaskError {
    /// Check dimensions up front; every stage rejects zero-sized surfaces.
    pub fn check_dimensions(width: u32, height: u32) -> Result<(), MaskError> {
        if width == 0 || height == 0 {
            Err(MaskError::InvalidDimensions { width, height })
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for MaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaskError::InvalidDimensions { width, height } => {
                write!(f, "Invalid dimensions: {}x{}", width, height)
            }
            MaskError::ImageDecodeFailure(e) => write!(f, "Image decode failed: {}", e),
            MaskError::UnsupportedMaskFormat(e) => write!(f, "Unsupported mask format: {}", e),
            MaskError::InvalidBias(e) => write!(f, "Invalid bias: {}", e),
            MaskError::Worker(e) => write!(f, "Mask job failed: {}", e),
            MaskError::Io(e) => write!(f, "I/O error: {}", e),
            MaskError::Serialize(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for MaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MaskError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MaskError {
    fn from(e: std::io::Error) -> Self {
        MaskError::Io(e)
    }
}

impl From<image::ImageError> for MaskError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::IoError(io) => MaskError::Io(io),
            other => MaskError::ImageDecodeFailure(other.to_string()),
        }
    }
}

impl From<Box<bincode::ErrorKind>> for MaskError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        MaskError::Serialize(e.to_string())
    }
}
