mod memory;
mod message;
mod project;
mod summary;

pub use memory::*;
pub use message::*;
pub use project::*;
pub use summary::*;

/// Clamp a model-supplied confidence into `[0.0, 1.0]`; NaN becomes 0.
pub fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}
