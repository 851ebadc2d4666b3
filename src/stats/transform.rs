//! Statistic transforms: activation tensor → descriptor.
//!
//! Every transform reads a 1×F×H×W activation as the F×N filter matrix `M`
//! (N = H·W). Internally we keep its transpose as an N×F column-major
//! `DMatrix`, which is exactly the CHW buffer with no copy-reordering, so
//! `Mᵀ`-products become `tr_mul` calls.
//!
//! Means and variances accumulate in f64 with a two-pass (centered)
//! formulation; the covariance is computed from centered activations rather
//! than `E[xxᵀ] - μμᵀ` to avoid cancellation on large layers.

use super::kind::{Statistic, StatisticKind};
use crate::core::FeatureMap;
use nalgebra::{DMatrix, DVector};

/// Output of a statistic transform.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    /// Same shape as the activation (`raw`).
    Raw(FeatureMap),
    /// Length F (`mean`, `variance`).
    Vector(DVector<f32>),
    /// F×F, symmetric (`gramian`, `covariance`).
    Matrix(DMatrix<f32>),
}

impl Descriptor {
    /// Flat view of the values (column-major for matrices).
    pub fn as_slice(&self) -> &[f32] {
        match self {
            Descriptor::Raw(map) => map.as_slice(),
            Descriptor::Vector(v) => v.as_slice(),
            Descriptor::Matrix(m) => m.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_finite(&self) -> bool {
        self.as_slice().iter().all(|v| v.is_finite())
    }

    pub fn as_vector(&self) -> Option<&DVector<f32>> {
        match self {
            Descriptor::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<&DMatrix<f32>> {
        match self {
            Descriptor::Matrix(m) => Some(m),
            _ => None,
        }
    }
}

/// Apply `stat` to an activation.
pub fn describe(stat: &Statistic, act: &FeatureMap) -> Descriptor {
    match stat.kind {
        StatisticKind::Raw => Descriptor::Raw(act.clone()),
        StatisticKind::Mean => Descriptor::Vector(mean_vector(act)),
        StatisticKind::Gramian => Descriptor::Matrix(gramian_matrix(act, stat.shift)),
        StatisticKind::Variance => Descriptor::Vector(variance_vector(act)),
        StatisticKind::Covariance => Descriptor::Matrix(covariance_matrix(act)),
    }
}

/// Mᵀ as an N×F matrix: column `f` holds filter `f`'s responses.
pub(crate) fn filter_columns(act: &FeatureMap) -> DMatrix<f32> {
    DMatrix::from_column_slice(act.spatial(), act.channels(), act.as_slice())
}

pub(crate) fn filter_means(act: &FeatureMap) -> Vec<f64> {
    let n = act.spatial().max(1) as f64;
    (0..act.channels())
        .map(|c| act.channel(c).iter().map(|&v| v as f64).sum::<f64>() / n)
        .collect()
}

/// Denominator of the unbiased variance; a single position has zero spread.
pub(crate) fn variance_denominator(n: usize) -> f64 {
    n.saturating_sub(1).max(1) as f64
}

/// Centered Mᵀ (each column minus its mean).
pub(crate) fn centered_columns(act: &FeatureMap) -> DMatrix<f32> {
    let n = act.spatial();
    let means = filter_means(act);
    let mut m = filter_columns(act);
    for (c, chunk) in m.as_mut_slice().chunks_mut(n.max(1)).enumerate() {
        let mu = means[c];
        for v in chunk {
            *v = ((*v as f64) - mu) as f32;
        }
    }
    m
}

/// Copy the upper triangle over the lower one (averaging both).
fn symmetrize(g: &mut DMatrix<f32>) {
    let f = g.nrows();
    for i in 0..f {
        for j in (i + 1)..f {
            let v = 0.5 * (g[(i, j)] + g[(j, i)]);
            g[(i, j)] = v;
            g[(j, i)] = v;
        }
    }
}

/// Per-filter mean, length F.
pub fn mean_vector(act: &FeatureMap) -> DVector<f32> {
    let means = filter_means(act);
    DVector::from_iterator(means.len(), means.into_iter().map(|m| m as f32))
}

/// `(M + s)(M + s)ᵀ / (F·N)`.
pub fn gramian_matrix(act: &FeatureMap, shift: f32) -> DMatrix<f32> {
    let f = act.channels();
    let n = act.spatial();
    if n == 0 {
        return DMatrix::zeros(f, f);
    }
    let mut m = filter_columns(act);
    if shift != 0.0 {
        m.add_scalar_mut(shift);
    }
    let mut g = m.tr_mul(&m);
    g /= (f * n) as f32;
    symmetrize(&mut g);
    g
}

/// Unbiased per-filter variance divided by F.
pub fn variance_vector(act: &FeatureMap) -> DVector<f32> {
    let f = act.channels();
    let denom = variance_denominator(act.spatial()) * f as f64;
    let means = filter_means(act);
    DVector::from_iterator(
        f,
        (0..f).map(|c| {
            let mu = means[c];
            let ss: f64 = act
                .channel(c)
                .iter()
                .map(|&v| {
                    let d = v as f64 - mu;
                    d * d
                })
                .sum();
            (ss / denom) as f32
        }),
    )
}

/// `(MMᵀ/N - μμᵀ) / F`, computed from centered activations.
pub fn covariance_matrix(act: &FeatureMap) -> DMatrix<f32> {
    let f = act.channels();
    let n = act.spatial();
    if n == 0 {
        return DMatrix::zeros(f, f);
    }
    let mc = centered_columns(act);
    let mut g = mc.tr_mul(&mc);
    g /= (n * f) as f32;
    symmetrize(&mut g);
    g
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// One filter, 4×4, values 0..15.
    fn ramp() -> FeatureMap {
        FeatureMap::from_fn(1, 4, 4, |_, y, x| (y * 4 + x) as f32)
    }

    #[test]
    fn test_raw_is_identity() {
        let act = ramp();
        assert_eq!(describe(&Statistic::raw(), &act), Descriptor::Raw(act.clone()));
    }

    #[test]
    fn test_ramp_by_hand() {
        let act = ramp();
        // mean = 120 / 16
        assert_eq!(mean_vector(&act).as_slice(), &[7.5]);
        // Σ i² = 1240, / (1 · 16)
        assert_eq!(gramian_matrix(&act, 0.0).as_slice(), &[77.5]);
        // Σ (i+1)² = 1496, / 16
        assert_eq!(gramian_matrix(&act, 1.0).as_slice(), &[93.5]);
        // Σ (i - 7.5)² = 340, / 15 / 1
        assert_relative_eq!(variance_vector(&act)[0], 340.0 / 15.0, epsilon = 1e-5);
        // 340 / 16 / 1
        assert_eq!(covariance_matrix(&act).as_slice(), &[21.25]);
    }

    #[test]
    fn test_two_filters_by_hand() {
        // filter 0: [1, 3], filter 1: [2, -2]
        let act = FeatureMap::new(2, 1, 2, vec![1.0, 3.0, 2.0, -2.0]).unwrap();

        assert_eq!(mean_vector(&act).as_slice(), &[2.0, 0.0]);

        // MMᵀ = [[10, -4], [-4, 8]], / (2 · 2)
        let g = gramian_matrix(&act, 0.0);
        assert_eq!(g[(0, 0)], 2.5);
        assert_eq!(g[(0, 1)], -1.0);
        assert_eq!(g[(1, 0)], -1.0);
        assert_eq!(g[(1, 1)], 2.0);

        // var (unbiased): [2, 8], / 2
        assert_eq!(variance_vector(&act).as_slice(), &[1.0, 4.0]);

        // centered: [-1, 1], [2, -2]; McMcᵀ = [[2, -4], [-4, 8]], / (2 · 2)
        let c = covariance_matrix(&act);
        assert_eq!(c[(0, 0)], 0.5);
        assert_eq!(c[(0, 1)], -1.0);
        assert_eq!(c[(1, 1)], 2.0);
    }

    #[test]
    fn test_vector_stats_are_reshape_invariant() {
        let act = FeatureMap::from_fn(3, 2, 8, |c, y, x| ((c + 1) * (y * 8 + x)) as f32 * 0.37 - 2.0);
        let square = act.reshaped(4, 4).unwrap();
        let column = act.reshaped(16, 1).unwrap();

        for other in [&square, &column] {
            assert_eq!(mean_vector(&act), mean_vector(other));
            assert_eq!(variance_vector(&act), variance_vector(other));
            assert_eq!(mean_vector(other).len(), 3);
            assert_eq!(variance_vector(other).len(), 3);
        }
    }

    #[test]
    fn test_gramian_grows_with_shift_on_constant_input() {
        let ones = FeatureMap::filled(2, 3, 3, 1.0);
        let mut prev = f32::NEG_INFINITY;
        for shift in [0.0f32, 0.5, 1.0, 10.0, 100.0] {
            let g = gramian_matrix(&ones, shift);
            // every entry is (1 + s)² / F
            assert_relative_eq!(g[(0, 1)], (1.0 + shift).powi(2) / 2.0, max_relative = 1e-5);
            assert!(g[(0, 0)] > prev);
            prev = g[(0, 0)];
        }
    }

    #[test]
    fn test_single_position_variance_is_zero() {
        let act = FeatureMap::new(2, 1, 1, vec![3.0, -4.0]).unwrap();
        assert_eq!(variance_vector(&act).as_slice(), &[0.0, 0.0]);
        assert_eq!(covariance_matrix(&act).as_slice(), &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_descriptor_shapes() {
        let act = FeatureMap::filled(5, 2, 3, 0.25);
        assert_eq!(describe(&Statistic::raw(), &act).len(), 30);
        for kind in [StatisticKind::Mean, StatisticKind::Variance] {
            assert_eq!(describe(&Statistic::new(kind, 0.0), &act).len(), 5);
        }
        for kind in [StatisticKind::Gramian, StatisticKind::Covariance] {
            let d = describe(&Statistic::new(kind, 0.0), &act);
            let m = d.as_matrix().unwrap();
            assert_eq!((m.nrows(), m.ncols()), (5, 5));
        }
    }
}
