//! Gradients of the statistic transforms w.r.t. the activation.
//!
//! With Mᵀ the N×F filter matrix (see `stats`), and `D` the upstream
//! gradient dL/d(descriptor):
//!
//! - raw:        dM = D
//! - mean:       dM[f, n] = D[f] / N
//! - gramian:    dMᵀ = (Mᵀ + s) (D + Dᵀ) / (F·N)
//! - variance:   dM[f, n] = D[f] · 2 (M[f, n] - μ_f) / ((N - 1) · F)
//! - covariance: dMᵀ = M_cᵀ (D + Dᵀ) / (F·N), M_c centered
//!
//! The mean-subtraction terms vanish for variance/covariance because the
//! centered rows sum to zero.

use crate::core::FeatureMap;
use crate::stats::{
    centered_columns, filter_columns, filter_means, variance_denominator, Statistic, StatisticKind,
};
use nalgebra::DMatrix;

/// dL/d(activation) for `describe(stat, act)`, given dL/d(descriptor).
///
/// `d_descriptor` is the flat descriptor gradient (column-major for matrices)
/// and must have the descriptor's length.
pub fn describe_backward(stat: &Statistic, act: &FeatureMap, d_descriptor: &[f32]) -> FeatureMap {
    let (f, h, w) = (act.channels(), act.height(), act.width());
    let n = act.spatial();

    match stat.kind {
        StatisticKind::Raw => {
            assert_eq!(d_descriptor.len(), act.len());
            FeatureMap::from_raw(f, h, w, d_descriptor.to_vec())
        }
        StatisticKind::Mean => {
            assert_eq!(d_descriptor.len(), f);
            let inv_n = 1.0 / n.max(1) as f32;
            FeatureMap::from_fn(f, h, w, |c, _, _| d_descriptor[c] * inv_n)
        }
        StatisticKind::Gramian => {
            assert_eq!(d_descriptor.len(), f * f);
            let mut m = filter_columns(act);
            if stat.shift != 0.0 {
                m.add_scalar_mut(stat.shift);
            }
            let d = symmetric_part(d_descriptor, f, (f * n).max(1));
            FeatureMap::from_raw(f, h, w, (m * d).as_slice().to_vec())
        }
        StatisticKind::Variance => {
            assert_eq!(d_descriptor.len(), f);
            let means = filter_means(act);
            let denom = variance_denominator(n) * f as f64;
            let mut data = Vec::with_capacity(act.len());
            for c in 0..f {
                let scale = 2.0 * d_descriptor[c] as f64 / denom;
                let mu = means[c];
                data.extend(act.channel(c).iter().map(|&v| ((v as f64 - mu) * scale) as f32));
            }
            FeatureMap::from_raw(f, h, w, data)
        }
        StatisticKind::Covariance => {
            assert_eq!(d_descriptor.len(), f * f);
            let mc = centered_columns(act);
            let d = symmetric_part(d_descriptor, f, (f * n).max(1));
            FeatureMap::from_raw(f, h, w, (mc * d).as_slice().to_vec())
        }
    }
}

/// `(D + Dᵀ) / denom` for an F×F upstream gradient.
fn symmetric_part(d: &[f32], f: usize, denom: usize) -> DMatrix<f32> {
    let d = DMatrix::from_column_slice(f, f, d);
    (&d + d.transpose()) / denom as f32
}
