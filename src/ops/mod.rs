pub mod brush;
pub mod codec;
pub mod jobs;
pub mod transform;
