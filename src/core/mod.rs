//! Core data structures.
//!
//! - `FeatureMap`: the 1×C×H×W tensor shared by images, activations and gradients
//! - `Device`: explicit compute placement
//! - `normalize` / `denormalize`: the pixel contract with the feature extractor
//!
//! All types here are "pure data" - no I/O, no optimization logic.

mod device;
pub mod normalize;
mod tensor;

pub use device::{Device, DeviceError};
pub use normalize::{denormalize, normalize, BGR_MEAN, PIXEL_SCALE};
pub use tensor::{FeatureMap, ShapeError};
