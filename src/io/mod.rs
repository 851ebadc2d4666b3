//! I/O operations for loading and saving data.
//!
//! - `.vggw` backbone weights (binary)
//! - Raster images (decode, shorter-side resize, encode)
//! - Output file naming

mod images;
mod naming;
mod weights;

pub use images::{
    load_normalized, load_rgb, resize_shorter_side, save_rgb, shorter_side_dims, ImageError,
};
pub use naming::{format_shift, output_file_name};
pub use weights::{
    load_weights, read_weights, save_weights, write_weights, ConvWeights, WeightSet, WeightsError,
};
