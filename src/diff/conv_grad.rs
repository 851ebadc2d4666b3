//! Gradients for the convolution stages (conv3x3 + ReLU).
//!
//! Only the input gradient is needed: backbone parameters are frozen.
//!
//! For stride 1 / padding 1, the input gradient of a 3×3 convolution is
//! itself a 3×3 convolution of the upstream gradient with the kernel
//! transposed over (out, in) and rotated 180°:
//!
//!   dX[c, y, x] = Σ_o Σ_ky,kx W[o, c, 2-ky, 2-kx] · dY[o, y+ky-1, x+kx-1]

use crate::core::FeatureMap;
use crate::extract::ops::conv3x3;

/// Kernel for the input-gradient convolution, laid out (in, out, ky, kx).
pub fn flip_kernel(weights: &[f32], out_channels: usize, in_channels: usize) -> Vec<f32> {
    assert_eq!(weights.len(), out_channels * in_channels * 9);
    let mut flipped = vec![0.0f32; weights.len()];
    for o in 0..out_channels {
        for c in 0..in_channels {
            for ky in 0..3 {
                for kx in 0..3 {
                    let src = ((o * in_channels + c) * 3 + (2 - ky)) * 3 + (2 - kx);
                    let dst = ((c * out_channels + o) * 3 + ky) * 3 + kx;
                    flipped[dst] = weights[src];
                }
            }
        }
    }
    flipped
}

/// dL/d(input) of `conv3x3`, given dL/d(output) and the flipped kernel.
pub fn conv3x3_input_grad(d_output: &FeatureMap, flipped: &[f32], in_channels: usize) -> FeatureMap {
    conv3x3(d_output, flipped, None, in_channels)
}

/// dL/d(pre-activation) of ReLU, computed from the post-activation output.
pub fn relu_backward(output: &FeatureMap, d_output: &FeatureMap) -> FeatureMap {
    assert!(output.same_shape(d_output));
    let data = output
        .as_slice()
        .iter()
        .zip(d_output.as_slice())
        .map(|(&y, &g)| if y > 0.0 { g } else { 0.0 })
        .collect();
    FeatureMap::from_raw(output.channels(), output.height(), output.width(), data)
}
