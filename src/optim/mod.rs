//! Optimization: layer losses, the L-BFGS optimizer, and the synthesis loop.
//!
//! - `loss`: MSE against a frozen descriptor (`LayerLoss`)
//! - `lbfgs`: quasi-Newton steps with a backtracking line search
//! - `synth`: drives a canvas toward all layer targets at once

pub mod lbfgs;
pub mod loss;
pub mod synth;

pub use lbfgs::{Convergence, Lbfgs, LbfgsConfig, StepReport};
pub use loss::{mse_and_grad, LayerLoss};
pub use synth::{Phase, Synthesis, SynthesisConfig, SynthesisError, SynthesisOutput};
