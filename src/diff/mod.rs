//! Differentiable operations (backward passes).
//!
//! Each submodule corresponds to a forward operation:
//! - `stats_grad`: statistic transforms (`stats`)
//! - `conv_grad`: 3×3 convolution + ReLU (`extract::ops`)
//! - `pool_grad`: 2×2 max/avg pooling (`extract::ops`)
//!
//! Gradients flow to inputs only; backbone parameters never receive one.

pub mod conv_grad;
pub mod pool_grad;
pub mod stats_grad;

pub use conv_grad::{conv3x3_input_grad, flip_kernel, relu_backward};
pub use pool_grad::pool2x2_backward;
pub use stats_grad::describe_backward;
