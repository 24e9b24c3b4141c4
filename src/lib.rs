//! Inpaint mask authoring and codec pipeline.
//!
//! Masks are edited at 1/8 of the generation resolution, stored as strictly
//! two-level images and re-registered when the source image moves.

pub mod logger;

pub mod canvas;
pub mod cli;
pub mod components;
pub mod error;
pub mod io;
pub mod ops;
pub mod settings;

pub use canvas::{CanvasLayout, MaskBuffer};
pub use components::session::{DeleteOutcome, MaskEditorSession, MaskOutput, MaskSlot, OpenRequest};
pub use error::MaskError;
pub use io::{CompressedMask, DisplayMask, MaskRecord};
pub use ops::transform::{BiasState, BiasTransform};
pub use settings::MaskSettings;
