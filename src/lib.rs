//! # stylestat: neural style transfer with pluggable feature statistics
//!
//! Synthesizes an image that keeps a content image's layout while matching
//! a style image's texture statistics, measured through the activations of a
//! frozen VGG-19 backbone. "Style" can be the per-filter mean, the (shifted)
//! Gramian, the per-filter variance, or the covariance of the activations.
//!
//! ## Architecture
//!
//! The crate is organized into several modules:
//!
//! - `core`: Fundamental data structures (feature maps, device, pixel normalization)
//! - `stats`: Statistic transforms (forward)
//! - `diff`: Differentiable operations (backward passes)
//! - `extract`: Frozen feature extractors (VGG-19, identity)
//! - `optim`: Layer losses, L-BFGS, and the synthesis loop
//! - `io`: File I/O (weights, images, output naming)
//! - `sweep`: Outer sweep over images, statistics and shifts
//!
//! Every backward pass is verified against finite differences in
//! `tests/gradient_check.rs`.

// Core data structures
pub mod core;

// Statistic transforms
pub mod stats;

// Differentiable operations (backward passes)
pub mod diff;

// Feature extraction
pub mod extract;

// Optimization (losses, L-BFGS, synthesis loop)
pub mod optim;

// I/O operations (weights, images)
pub mod io;

// Sweep orchestration
pub mod sweep;

// Re-export commonly used types at crate root for convenience
pub use crate::core::{Device, FeatureMap};
pub use extract::{FeatureExtractor, IdentityExtractor, Vgg19};
pub use optim::{LayerLoss, Synthesis, SynthesisConfig, SynthesisOutput};
pub use stats::{Statistic, StatisticKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
