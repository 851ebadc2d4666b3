//! Feature extraction: a frozen network as a differentiable measurement device.
//!
//! A `FeatureExtractor` maps an image to named layer activations in one
//! shared forward pass and back-propagates layer gradients to the image.
//! Parameters are read-only; nothing here ever updates them.
//!
//! - `Vgg19`: the pretrained backbone (weights from a `.vggw` file)
//! - `IdentityExtractor`: exposes the input as layer `"input"`
//! - `ops`: forward primitives shared with `diff`

mod identity;
pub mod ops;
mod vgg;

pub use identity::{IdentityExtractor, IdentityTrace, INPUT_LAYER};
pub use ops::PoolKind;
pub use vgg::{Vgg19, VggTrace, CONV_PLAN, VGG19_LAYERS};

use crate::core::{FeatureMap, ShapeError};
use crate::io::WeightsError;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unknown layer '{0}'")]
    UnknownLayer(String),

    #[error("layer '{0}' was not computed by this forward pass")]
    NotComputed(String),

    #[error("input has {actual} channels, extractor expects {expected}")]
    InputChannels { expected: usize, actual: usize },

    #[error("gradient for layer '{layer}' has shape {actual:?}, activation has {expected:?}")]
    GradientShape {
        layer: String,
        expected: [usize; 3],
        actual: [usize; 3],
    },

    #[error("unknown pool kind '{0}' (expected max or avg)")]
    UnknownPool(String),

    #[error("missing weights for '{0}'")]
    MissingWeights(String),

    #[error("weights for '{name}' are {actual}, expected {expected}")]
    WeightShape {
        name: String,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Weights(#[from] WeightsError),

    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// Activations recorded by one forward pass.
pub trait Activations {
    fn get(&self, layer: &str) -> Option<&FeatureMap>;
}

pub trait FeatureExtractor: Sync {
    /// Everything the backward pass needs (including the activations).
    type Trace: Activations;

    fn has_layer(&self, name: &str) -> bool;

    /// Run the network far enough to produce every layer in `layers`.
    fn forward(&self, image: &FeatureMap, layers: &[String]) -> Result<Self::Trace, ExtractError>;

    /// dL/d(image) given dL/d(activation) for some recorded layers.
    ///
    /// Layers without an entry in `grads` contribute nothing.
    fn backward(
        &self,
        trace: &Self::Trace,
        grads: &HashMap<String, FeatureMap>,
    ) -> Result<FeatureMap, ExtractError>;

    /// Fail on the first layer name this extractor does not know.
    fn check_layers(&self, layers: &[String]) -> Result<(), ExtractError> {
        match layers.iter().find(|l| !self.has_layer(l)) {
            Some(l) => Err(ExtractError::UnknownLayer(l.clone())),
            None => Ok(()),
        }
    }

    /// Owned activations for `layers` (no gradient bookkeeping kept).
    fn extract(
        &self,
        image: &FeatureMap,
        layers: &[String],
    ) -> Result<HashMap<String, FeatureMap>, ExtractError> {
        let trace = self.forward(image, layers)?;
        layers
            .iter()
            .map(|l| {
                trace
                    .get(l)
                    .cloned()
                    .map(|a| (l.clone(), a))
                    .ok_or_else(|| ExtractError::NotComputed(l.clone()))
            })
            .collect()
    }
}

/// Check that a gradient matches the activation it belongs to.
pub(crate) fn check_gradient(layer: &str, act: &FeatureMap, grad: &FeatureMap) -> Result<(), ExtractError> {
    if act.same_shape(grad) {
        Ok(())
    } else {
        Err(ExtractError::GradientShape {
            layer: layer.to_string(),
            expected: act.dims(),
            actual: grad.dims(),
        })
    }
}
