//! Invariants of the statistic transforms that hold for any activation.

use approx::assert_relative_eq;
use nalgebra::{DMatrix, SymmetricEigen};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use stylestat::core::FeatureMap;
use stylestat::stats::{covariance_matrix, describe, gramian_matrix, mean_vector, variance_vector, Statistic, StatisticKind};

fn random_activation(rng: &mut StdRng, c: usize, h: usize, w: usize) -> FeatureMap {
    FeatureMap::from_fn(c, h, w, |_, _, _| rng.gen_range(-2.0..3.0))
}

fn min_eigenvalue(m: &DMatrix<f32>) -> f64 {
    let m64 = m.map(|v| v as f64);
    SymmetricEigen::new(m64).eigenvalues.min()
}

fn assert_symmetric(m: &DMatrix<f32>) {
    assert!(m.is_square());
    for i in 0..m.nrows() {
        for j in 0..m.ncols() {
            assert_eq!(m[(i, j)], m[(j, i)], "entry ({i}, {j})");
        }
    }
}

#[test]
fn test_gramian_is_symmetric_psd() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..10 {
        let act = random_activation(&mut rng, 6, 5, 7);
        let g = gramian_matrix(&act, 0.0);
        assert_symmetric(&g);
        let scale = g.amax() as f64;
        assert!(min_eigenvalue(&g) >= -1e-5 * scale);
    }
}

#[test]
fn test_covariance_is_symmetric_psd() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..10 {
        let act = random_activation(&mut rng, 5, 4, 6);
        let c = covariance_matrix(&act);
        assert_symmetric(&c);
        let scale = c.amax() as f64;
        assert!(min_eigenvalue(&c) >= -1e-5 * scale);
    }
}

#[test]
fn test_shifted_gramian_stays_symmetric() {
    let mut rng = StdRng::seed_from_u64(13);
    let act = random_activation(&mut rng, 4, 3, 3);
    for shift in [-600.0, -1.0, 2.5, 600.0] {
        assert_symmetric(&gramian_matrix(&act, shift));
    }
}

#[test]
fn test_vector_stats_depend_only_on_spatial_count() {
    let mut rng = StdRng::seed_from_u64(17);
    let act = random_activation(&mut rng, 3, 4, 6);
    for (h, w) in [(1, 24), (2, 12), (3, 8), (24, 1)] {
        let r = act.reshaped(h, w).unwrap();
        assert_eq!(mean_vector(&r), mean_vector(&act));
        assert_eq!(variance_vector(&r), variance_vector(&act));
        assert_eq!(mean_vector(&r).len(), 3);
    }
}

#[test]
fn test_gramian_grows_with_shift_for_constant_input() {
    let ones = FeatureMap::filled(2, 3, 3, 1.0);
    let mut prev = gramian_matrix(&ones, 0.0);
    for shift in [0.5f32, 1.0, 10.0, 100.0] {
        let next = gramian_matrix(&ones, shift);
        assert!(next.iter().zip(prev.iter()).all(|(n, p)| n > p), "shift {shift}");
        prev = next;
    }
}

/// One filter, 4×4 positions: eight 1s followed by eight 3s.
#[test]
fn test_one_filter_scenario_by_hand() {
    let values: Vec<f32> = (0..16).map(|i| if i < 8 { 1.0 } else { 3.0 }).collect();
    let act = FeatureMap::new(1, 4, 4, values.clone()).unwrap();

    let raw = describe(&Statistic::raw(), &act);
    assert_eq!(raw.as_slice(), values.as_slice());

    let mean = describe(&Statistic::new(StatisticKind::Mean, 0.0), &act);
    assert_eq!(mean.as_slice(), &[2.0]);

    // (8·1 + 8·9) / 16
    let gram = describe(&Statistic::gramian(0.0), &act);
    assert_eq!(gram.as_slice(), &[5.0]);

    // (8·4 + 8·16) / 16
    let gram_shifted = describe(&Statistic::gramian(1.0), &act);
    assert_eq!(gram_shifted.as_slice(), &[10.0]);

    // Σ(x-2)² = 16, unbiased over 16 positions, one filter
    let var = describe(&Statistic::new(StatisticKind::Variance, 0.0), &act);
    assert_relative_eq!(var.as_slice()[0], 16.0 / 15.0, epsilon = 1e-6);

    let cov = describe(&Statistic::new(StatisticKind::Covariance, 0.0), &act);
    assert_relative_eq!(cov.as_slice()[0], 1.0, epsilon = 1e-6);
}
