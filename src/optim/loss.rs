//! Layer losses: one statistic bound to a frozen target descriptor.

use crate::core::FeatureMap;
use crate::diff::describe_backward;
use crate::stats::{describe, Descriptor, Statistic, StatsError};

/// Mean squared error between a descriptor and a target, returning
/// (loss, dL/d(descriptor)).
///
/// Sums accumulate in f64.
pub fn mse_and_grad(source: &[f32], target: &[f32]) -> (f64, Vec<f32>) {
    assert_eq!(source.len(), target.len());
    let n = source.len().max(1) as f64;
    let mut loss = 0.0f64;
    let grad = source
        .iter()
        .zip(target)
        .map(|(&s, &t)| {
            let diff = s as f64 - t as f64;
            loss += diff * diff;
            (2.0 * diff / n) as f32
        })
        .collect();
    (loss / n, grad)
}

/// A statistic plus the descriptor of a reference activation.
///
/// The target is computed once at construction and is a plain value from
/// then on: evaluation reads it and never produces a gradient for it.
#[derive(Debug, Clone)]
pub struct LayerLoss {
    statistic: Statistic,
    target: Descriptor,
}

impl LayerLoss {
    pub fn new(statistic: Statistic, target_activation: &FeatureMap) -> Self {
        Self {
            statistic,
            target: describe(&statistic, target_activation),
        }
    }

    /// Build from a kind name (`raw`, `mean`, `gramian`, `variance`, `covariance`).
    pub fn from_name(kind: &str, shift: f32, target_activation: &FeatureMap) -> Result<Self, StatsError> {
        Ok(Self::new(Statistic::parse(kind, shift)?, target_activation))
    }

    pub fn statistic(&self) -> &Statistic {
        &self.statistic
    }

    pub fn target(&self) -> &Descriptor {
        &self.target
    }

    fn describe_checked(&self, source: &FeatureMap) -> Result<Descriptor, StatsError> {
        let d = describe(&self.statistic, source);
        if d.len() != self.target.len() {
            return Err(StatsError::ShapeMismatch {
                expected: self.target.len(),
                actual: d.len(),
            });
        }
        Ok(d)
    }

    /// MSE between the source's descriptor and the target.
    pub fn evaluate(&self, source: &FeatureMap) -> Result<f64, StatsError> {
        let d = self.describe_checked(source)?;
        Ok(mse_and_grad(d.as_slice(), self.target.as_slice()).0)
    }

    /// Loss and its gradient w.r.t. the source activation.
    pub fn evaluate_with_grad(&self, source: &FeatureMap) -> Result<(f64, FeatureMap), StatsError> {
        let d = self.describe_checked(source)?;
        let (loss, d_descriptor) = mse_and_grad(d.as_slice(), self.target.as_slice());
        let grad = describe_backward(&self.statistic, source, &d_descriptor);
        Ok((loss, grad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatisticKind;
    use approx::assert_relative_eq;

    fn activation(seed: usize) -> FeatureMap {
        FeatureMap::from_fn(3, 4, 5, |c, y, x| (((c * 7 + y * 5 + x * 3 + seed) % 11) as f32) * 0.3 - 1.0)
    }

    #[test]
    fn test_self_consistency_is_exactly_zero() {
        let target = activation(0);
        for kind in StatisticKind::ALL {
            let loss = LayerLoss::new(Statistic::new(kind, 2.5), &target);
            assert_eq!(loss.evaluate(&target).unwrap(), 0.0, "{kind}");
            let (l, g) = loss.evaluate_with_grad(&target).unwrap();
            assert_eq!(l, 0.0);
            assert!(g.as_slice().iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_evaluation_does_not_mutate_target() {
        let loss = LayerLoss::new(Statistic::gramian(-1.0), &activation(0));
        let before = loss.target().clone();
        let source = activation(3);
        let a = loss.evaluate(&source).unwrap();
        let b = loss.evaluate(&source).unwrap();
        assert_eq!(a, b);
        assert!(a > 0.0);
        assert_eq!(loss.target(), &before);
    }

    #[test]
    fn test_mean_loss_by_hand() {
        // target means [1, 3], source means [2, 1]: ((1)² + (2)²) / 2
        let target = FeatureMap::new(2, 1, 2, vec![0.0, 2.0, 3.0, 3.0]).unwrap();
        let source = FeatureMap::new(2, 1, 2, vec![2.0, 2.0, 0.0, 2.0]).unwrap();
        let loss = LayerLoss::from_name("mean", 0.0, &target).unwrap();
        assert_relative_eq!(loss.evaluate(&source).unwrap(), 2.5, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_kind() {
        let err = LayerLoss::from_name("median", 0.0, &activation(0)).unwrap_err();
        assert_eq!(err, StatsError::InvalidKind("median".to_string()));
    }

    #[test]
    fn test_filter_count_mismatch() {
        let loss = LayerLoss::new(Statistic::gramian(0.0), &activation(0));
        let other = FeatureMap::zeros(4, 4, 5);
        assert_eq!(
            loss.evaluate(&other).unwrap_err(),
            StatsError::ShapeMismatch {
                expected: 9,
                actual: 16
            }
        );
    }

    #[test]
    fn test_gramian_accepts_other_spatial_size() {
        let loss = LayerLoss::new(Statistic::gramian(0.0), &activation(0));
        let bigger = FeatureMap::filled(3, 8, 8, 0.5);
        assert!(loss.evaluate(&bigger).unwrap() > 0.0);
    }
}
