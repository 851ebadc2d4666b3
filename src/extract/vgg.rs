//! VGG-19 convolutional backbone (feature layers only).
//!
//! Five blocks of 3×3 convolutions + ReLU, each followed by 2×2 pooling.
//! Stage outputs use the Caffe-era VGG naming:
//! `rXY` is the ReLU output of conv X_Y, `pX` the output of pool X.
//!
//! The forward pass stops at the deepest requested stage and keeps every
//! intermediate output, which the backward pass needs for ReLU masks and
//! max-pool routing.

use super::ops::{conv3x3, pool2x2, relu_inplace, PoolKind};
use super::{check_gradient, Activations, ExtractError, FeatureExtractor};
use crate::core::FeatureMap;
use crate::diff::{conv3x3_input_grad, flip_kernel, pool2x2_backward, relu_backward};
use crate::io::{load_weights, WeightSet};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Convolutions in forward order: (weights name, in_channels, out_channels).
pub const CONV_PLAN: [(&str, usize, usize); 16] = [
    ("conv1_1", 3, 64),
    ("conv1_2", 64, 64),
    ("conv2_1", 64, 128),
    ("conv2_2", 128, 128),
    ("conv3_1", 128, 256),
    ("conv3_2", 256, 256),
    ("conv3_3", 256, 256),
    ("conv3_4", 256, 256),
    ("conv4_1", 256, 512),
    ("conv4_2", 512, 512),
    ("conv4_3", 512, 512),
    ("conv4_4", 512, 512),
    ("conv5_1", 512, 512),
    ("conv5_2", 512, 512),
    ("conv5_3", 512, 512),
    ("conv5_4", 512, 512),
];

/// Every named stage output, in forward order.
pub const VGG19_LAYERS: [&str; 21] = [
    "r11", "r12", "p1", "r21", "r22", "p2", "r31", "r32", "r33", "r34", "p3", "r41", "r42", "r43",
    "r44", "p4", "r51", "r52", "r53", "r54", "p5",
];

#[derive(Debug, Clone, Copy)]
enum Stage {
    /// Index into `CONV_PLAN`.
    Conv(usize),
    Pool,
}

const STAGES: [Stage; 21] = [
    Stage::Conv(0),
    Stage::Conv(1),
    Stage::Pool,
    Stage::Conv(2),
    Stage::Conv(3),
    Stage::Pool,
    Stage::Conv(4),
    Stage::Conv(5),
    Stage::Conv(6),
    Stage::Conv(7),
    Stage::Pool,
    Stage::Conv(8),
    Stage::Conv(9),
    Stage::Conv(10),
    Stage::Conv(11),
    Stage::Pool,
    Stage::Conv(12),
    Stage::Conv(13),
    Stage::Conv(14),
    Stage::Conv(15),
    Stage::Pool,
];

fn stage_index(name: &str) -> Option<usize> {
    VGG19_LAYERS.iter().position(|&l| l == name)
}

#[derive(Debug, Clone)]
struct ConvLayer {
    in_channels: usize,
    out_channels: usize,
    weights: Vec<f32>,
    bias: Vec<f32>,
    /// Kernel for the input-gradient convolution.
    flipped: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct Vgg19 {
    convs: Vec<ConvLayer>,
    pool: PoolKind,
}

/// Forward-pass record: the input plus every stage output up to the deepest
/// requested one.
#[derive(Debug, Clone)]
pub struct VggTrace {
    input: FeatureMap,
    outputs: Vec<FeatureMap>,
}

impl VggTrace {
    /// Number of stages that were evaluated.
    pub fn depth(&self) -> usize {
        self.outputs.len()
    }
}

impl Activations for VggTrace {
    fn get(&self, layer: &str) -> Option<&FeatureMap> {
        stage_index(layer).and_then(|i| self.outputs.get(i))
    }
}

impl Vgg19 {
    /// Build from a weight set, validating every convolution's shape.
    pub fn from_weights(set: &WeightSet, pool: PoolKind) -> Result<Self, ExtractError> {
        let mut convs = Vec::with_capacity(CONV_PLAN.len());
        for (name, in_c, out_c) in CONV_PLAN {
            let layer = set
                .get(name)
                .ok_or_else(|| ExtractError::MissingWeights(name.to_string()))?;
            if layer.in_channels != in_c || layer.out_channels != out_c || layer.kernel != 3 {
                return Err(ExtractError::WeightShape {
                    name: name.to_string(),
                    expected: format!("{out_c}x{in_c}x3x3"),
                    actual: format!(
                        "{}x{}x{}x{}",
                        layer.out_channels, layer.in_channels, layer.kernel, layer.kernel
                    ),
                });
            }
            convs.push(ConvLayer {
                in_channels: in_c,
                out_channels: out_c,
                flipped: flip_kernel(&layer.weights, out_c, in_c),
                weights: layer.weights.clone(),
                bias: layer.bias.clone(),
            });
        }
        Ok(Self { convs, pool })
    }

    /// Load a `.vggw` weights file.
    pub fn load(path: &Path, pool: PoolKind) -> Result<Self, ExtractError> {
        let set = load_weights(path)?;
        debug!(path = %path.display(), tensors = set.len(), "loaded backbone weights");
        Self::from_weights(&set, pool)
    }

    pub fn pool_kind(&self) -> PoolKind {
        self.pool
    }

    pub fn layer_names() -> &'static [&'static str] {
        &VGG19_LAYERS
    }

    fn run_stage(&self, stage: Stage, input: &FeatureMap) -> FeatureMap {
        match stage {
            Stage::Conv(j) => {
                let conv = &self.convs[j];
                let mut out = conv3x3(input, &conv.weights, Some(&conv.bias), conv.out_channels);
                relu_inplace(&mut out);
                out
            }
            Stage::Pool => pool2x2(input, self.pool),
        }
    }
}

impl FeatureExtractor for Vgg19 {
    type Trace = VggTrace;

    fn has_layer(&self, name: &str) -> bool {
        stage_index(name).is_some()
    }

    fn forward(&self, image: &FeatureMap, layers: &[String]) -> Result<VggTrace, ExtractError> {
        if image.channels() != 3 {
            return Err(ExtractError::InputChannels {
                expected: 3,
                actual: image.channels(),
            });
        }
        let mut depth = 0;
        for layer in layers {
            let idx = stage_index(layer).ok_or_else(|| ExtractError::UnknownLayer(layer.clone()))?;
            depth = depth.max(idx + 1);
        }

        let mut outputs: Vec<FeatureMap> = Vec::with_capacity(depth);
        for (i, &stage) in STAGES.iter().enumerate().take(depth) {
            let out = {
                let input = if i == 0 { image } else { &outputs[i - 1] };
                self.run_stage(stage, input)
            };
            outputs.push(out);
        }

        Ok(VggTrace {
            input: image.clone(),
            outputs,
        })
    }

    fn backward(
        &self,
        trace: &VggTrace,
        grads: &HashMap<String, FeatureMap>,
    ) -> Result<FeatureMap, ExtractError> {
        for (layer, grad) in grads {
            let idx = stage_index(layer).ok_or_else(|| ExtractError::UnknownLayer(layer.clone()))?;
            let act = trace
                .outputs
                .get(idx)
                .ok_or_else(|| ExtractError::NotComputed(layer.clone()))?;
            check_gradient(layer, act, grad)?;
        }

        let mut upstream: Option<FeatureMap> = None;
        for i in (0..trace.outputs.len()).rev() {
            if let Some(g) = grads.get(VGG19_LAYERS[i]) {
                match upstream.as_mut() {
                    Some(u) => u.add_assign(g)?,
                    None => upstream = Some(g.clone()),
                }
            }
            let Some(g) = upstream.take() else {
                continue;
            };

            let input = if i == 0 { &trace.input } else { &trace.outputs[i - 1] };
            let d_input = match STAGES[i] {
                Stage::Conv(j) => {
                    let conv = &self.convs[j];
                    let d_pre = relu_backward(&trace.outputs[i], &g);
                    conv3x3_input_grad(&d_pre, &conv.flipped, conv.in_channels)
                }
                Stage::Pool => pool2x2_backward(input, &g, self.pool),
            };
            upstream = Some(d_input);
        }

        let [c, h, w] = trace.input.dims();
        Ok(upstream.unwrap_or_else(|| FeatureMap::zeros(c, h, w)))
    }
}
