//! Forward network primitives: 3×3 convolution, ReLU, 2×2 pooling.
//!
//! The convolution is im2col + GEMM. Rows of the output are processed in
//! bands so the column buffer stays bounded on large images; bands run in
//! parallel with rayon and are scattered into the CHW output afterwards.

use super::ExtractError;
use crate::core::FeatureMap;
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper bound on im2col buffer entries per band.
const BAND_BUDGET: usize = 1 << 22;

/// Pooling used between VGG blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    #[default]
    Max,
    Avg,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolKind::Max => write!(f, "max"),
            PoolKind::Avg => write!(f, "avg"),
        }
    }
}

impl FromStr for PoolKind {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max" => Ok(PoolKind::Max),
            "avg" | "average" => Ok(PoolKind::Avg),
            other => Err(ExtractError::UnknownPool(other.to_string())),
        }
    }
}

fn band_rows(k: usize, width: usize, height: usize) -> usize {
    (BAND_BUDGET / (k * width).max(1)).clamp(1, height.max(1))
}

/// im2col for output rows `y0..y1`: a P×K matrix (P = band positions,
/// K = C·9), column `k = c·9 + ky·3 + kx` contiguous.
fn im2col_band(input: &FeatureMap, y0: usize, y1: usize) -> DMatrix<f32> {
    let (c, h, w) = (input.channels(), input.height(), input.width());
    let p = (y1 - y0) * w;
    let mut buf = vec![0.0f32; p * c * 9];
    let src = input.as_slice();

    for ci in 0..c {
        let plane = &src[ci * h * w..(ci + 1) * h * w];
        for ky in 0..3 {
            for kx in 0..3 {
                let k = ci * 9 + ky * 3 + kx;
                let col = &mut buf[k * p..(k + 1) * p];
                for y in y0..y1 {
                    let sy = y as isize + ky as isize - 1;
                    if sy < 0 || sy >= h as isize {
                        continue;
                    }
                    let row = &plane[sy as usize * w..(sy as usize + 1) * w];
                    let dst = &mut col[(y - y0) * w..(y - y0 + 1) * w];
                    // sx = x + kx - 1
                    match kx {
                        0 => dst[1..].copy_from_slice(&row[..w - 1]),
                        1 => dst.copy_from_slice(row),
                        _ => dst[..w - 1].copy_from_slice(&row[1..]),
                    }
                }
            }
        }
    }
    DMatrix::from_vec(p, c * 9, buf)
}

/// 3×3 convolution, stride 1, zero padding 1.
///
/// `weights` is laid out (out, in, ky, kx); `bias` has `out_channels` entries.
pub fn conv3x3(
    input: &FeatureMap,
    weights: &[f32],
    bias: Option<&[f32]>,
    out_channels: usize,
) -> FeatureMap {
    let (c, h, w) = (input.channels(), input.height(), input.width());
    let k = c * 9;
    assert_eq!(weights.len(), out_channels * k, "conv3x3 weight size");
    if let Some(b) = bias {
        assert_eq!(b.len(), out_channels, "conv3x3 bias size");
    }
    if h == 0 || w == 0 {
        return FeatureMap::zeros(out_channels, h, w);
    }

    // K×O with (k, o) at o·K + k, i.e. the raw (out, in, ky, kx) buffer.
    let kernel = DMatrix::from_column_slice(k, out_channels, weights);
    let rows = band_rows(k, w, h);
    let starts: Vec<usize> = (0..h).step_by(rows).collect();

    let bands: Vec<(usize, DMatrix<f32>)> = starts
        .into_par_iter()
        .map(|y0| {
            let y1 = (y0 + rows).min(h);
            let cols = im2col_band(input, y0, y1);
            (y0, cols * &kernel)
        })
        .collect();

    let hw = h * w;
    let mut out = vec![0.0f32; out_channels * hw];
    for (y0, band) in bands {
        let p = band.nrows();
        let values = band.as_slice();
        for o in 0..out_channels {
            let dst = &mut out[o * hw + y0 * w..o * hw + y0 * w + p];
            dst.copy_from_slice(&values[o * p..(o + 1) * p]);
        }
    }

    if let Some(b) = bias {
        for (o, chunk) in out.chunks_mut(hw).enumerate() {
            let bo = b[o];
            for v in chunk {
                *v += bo;
            }
        }
    }

    FeatureMap::from_raw(out_channels, h, w, out)
}

pub fn relu_inplace(map: &mut FeatureMap) {
    for v in map.as_mut_slice() {
        if *v < 0.0 {
            *v = 0.0;
        }
    }
}

/// 2×2 pooling, stride 2 (odd trailing rows/columns are dropped).
pub fn pool2x2(input: &FeatureMap, kind: PoolKind) -> FeatureMap {
    let (c, h, w) = (input.channels(), input.height(), input.width());
    let (oh, ow) = (h / 2, w / 2);
    FeatureMap::from_fn(c, oh, ow, |ci, y, x| {
        let a = input.get(ci, 2 * y, 2 * x);
        let b = input.get(ci, 2 * y, 2 * x + 1);
        let cc = input.get(ci, 2 * y + 1, 2 * x);
        let d = input.get(ci, 2 * y + 1, 2 * x + 1);
        match kind {
            PoolKind::Max => a.max(b).max(cc).max(d),
            PoolKind::Avg => (a + b + cc + d) * 0.25,
        }
    })
}
