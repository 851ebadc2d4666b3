//! Limited-memory BFGS over a flat parameter vector.
//!
//! One `step` = one quasi-Newton direction (two-loop recursion over the last
//! `history_size` curvature pairs) followed by a backtracking Armijo line
//! search. The objective may be evaluated several times inside a step; the
//! loss/gradient at the accepted point is cached for the next step.
//!
//! Defaults follow the usual style-transfer setup: unit learning rate, 100
//! curvature pairs, and a first step scaled by `min(1, 1/‖g‖₁)`.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LbfgsConfig {
    pub lr: f32,
    pub history_size: usize,
    pub max_line_search_evals: usize,
    /// Stop when max |g| falls to this.
    pub tolerance_grad: f32,
    /// Stop when the loss or the step changes less than this.
    pub tolerance_change: f32,
    /// Sufficient-decrease constant.
    pub armijo_c1: f32,
    /// Step shrink factor per rejected trial.
    pub backtrack: f32,
}

impl Default for LbfgsConfig {
    fn default() -> Self {
        Self {
            lr: 1.0,
            history_size: 100,
            max_line_search_evals: 25,
            tolerance_grad: 1e-7,
            tolerance_change: 1e-9,
            armijo_c1: 1e-4,
            backtrack: 0.5,
        }
    }
}

/// Why the optimizer considers itself finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Convergence {
    GradientVanished,
    NoDescent,
    LossStalled,
    StepVanished,
    LineSearchFailed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Loss at the parameters after the step.
    pub loss: f64,
    /// Objective evaluations performed during this step.
    pub evaluations: usize,
    /// Accepted step length (0 when the parameters did not move).
    pub step_length: f64,
    pub converged: Option<Convergence>,
}

#[derive(Debug, Clone)]
pub struct Lbfgs {
    config: LbfgsConfig,
    s_hist: VecDeque<Vec<f32>>,
    y_hist: VecDeque<Vec<f32>>,
    rho: VecDeque<f64>,
    /// Loss and gradient at the current parameters.
    current: Option<(f64, Vec<f32>)>,
    evaluations: usize,
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum()
}

fn max_abs(v: &[f32]) -> f32 {
    v.iter().fold(0.0f32, |m, &x| m.max(x.abs()))
}

impl Lbfgs {
    pub fn new(config: LbfgsConfig) -> Self {
        Self {
            config,
            s_hist: VecDeque::new(),
            y_hist: VecDeque::new(),
            rho: VecDeque::new(),
            current: None,
            evaluations: 0,
        }
    }

    pub fn config(&self) -> &LbfgsConfig {
        &self.config
    }

    /// Total objective evaluations so far.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn history_len(&self) -> usize {
        self.s_hist.len()
    }

    /// Forget curvature pairs and the cached evaluation.
    pub fn reset(&mut self) {
        self.s_hist.clear();
        self.y_hist.clear();
        self.rho.clear();
        self.current = None;
    }

    /// Two-loop recursion: returns -H·g.
    fn direction(&self, grad: &[f32]) -> Vec<f32> {
        let k = self.s_hist.len();
        let mut q: Vec<f64> = grad.iter().map(|&g| g as f64).collect();
        let mut alphas = vec![0.0f64; k];

        for i in (0..k).rev() {
            let s = &self.s_hist[i];
            let y = &self.y_hist[i];
            let a = self.rho[i] * s.iter().zip(&q).map(|(&si, &qi)| si as f64 * qi).sum::<f64>();
            alphas[i] = a;
            for (qi, &yi) in q.iter_mut().zip(y) {
                *qi -= a * yi as f64;
            }
        }

        let gamma = match (self.s_hist.back(), self.y_hist.back()) {
            (Some(s), Some(y)) => {
                let yy = dot(y, y);
                if yy > 0.0 {
                    dot(s, y) / yy
                } else {
                    1.0
                }
            }
            _ => 1.0,
        };
        for qi in &mut q {
            *qi *= gamma;
        }

        for i in 0..k {
            let s = &self.s_hist[i];
            let y = &self.y_hist[i];
            let b = self.rho[i] * y.iter().zip(&q).map(|(&yi, &ri)| yi as f64 * ri).sum::<f64>();
            for (ri, &si) in q.iter_mut().zip(s) {
                *ri += si as f64 * (alphas[i] - b);
            }
        }

        q.into_iter().map(|r| -r as f32).collect()
    }

    fn push_pair(&mut self, s: Vec<f32>, y: Vec<f32>, ys: f64) {
        if self.s_hist.len() == self.config.history_size {
            self.s_hist.pop_front();
            self.y_hist.pop_front();
            self.rho.pop_front();
        }
        if self.config.history_size > 0 {
            self.s_hist.push_back(s);
            self.y_hist.push_back(y);
            self.rho.push_back(1.0 / ys);
        }
    }

    /// Perform one optimization step, updating `params` in place.
    ///
    /// `objective(x)` returns (loss, gradient). Errors from the objective
    /// abort the step and leave `params` untouched.
    pub fn step<F, E>(&mut self, params: &mut [f32], mut objective: F) -> Result<StepReport, E>
    where
        F: FnMut(&[f32]) -> Result<(f64, Vec<f32>), E>,
    {
        let cfg = self.config;
        let mut evaluations = 0;

        let (loss, grad) = match self.current.take() {
            Some(cached) if cached.1.len() == params.len() => cached,
            _ => {
                evaluations += 1;
                self.evaluations += 1;
                objective(params)?
            }
        };

        let report = |loss: f64, evaluations: usize, step_length: f64, converged| StepReport {
            loss,
            evaluations,
            step_length,
            converged,
        };

        if max_abs(&grad) <= cfg.tolerance_grad {
            self.current = Some((loss, grad));
            return Ok(report(loss, evaluations, 0.0, Some(Convergence::GradientVanished)));
        }

        let mut dir = self.direction(&grad);
        let mut gtd = dot(&grad, &dir);
        if !(gtd < 0.0) {
            // Curvature information went bad; fall back to steepest descent.
            self.reset();
            dir = grad.iter().map(|&g| -g).collect();
            gtd = -dot(&grad, &grad);
        }
        if gtd > -(cfg.tolerance_change as f64) {
            self.current = Some((loss, grad));
            return Ok(report(loss, evaluations, 0.0, Some(Convergence::NoDescent)));
        }

        let lr = cfg.lr as f64;
        let mut t = if self.s_hist.is_empty() {
            let g1: f64 = grad.iter().map(|&g| g.abs() as f64).sum();
            (1.0 / g1).min(1.0) * lr
        } else {
            lr
        };

        let mut trial = vec![0.0f32; params.len()];
        let mut accepted = None;
        for _ in 0..cfg.max_line_search_evals.max(1) {
            for ((x, &p), &d) in trial.iter_mut().zip(params.iter()).zip(&dir) {
                *x = (p as f64 + t * d as f64) as f32;
            }
            evaluations += 1;
            self.evaluations += 1;
            let (f_new, g_new) = objective(&trial)?;
            if f_new <= loss + cfg.armijo_c1 as f64 * t * gtd {
                accepted = Some((f_new, g_new));
                break;
            }
            t *= cfg.backtrack as f64;
        }

        let Some((f_new, g_new)) = accepted else {
            self.current = Some((loss, grad));
            return Ok(report(loss, evaluations, 0.0, Some(Convergence::LineSearchFailed)));
        };

        let s: Vec<f32> = trial.iter().zip(params.iter()).map(|(&a, &b)| a - b).collect();
        let y: Vec<f32> = g_new.iter().zip(&grad).map(|(&a, &b)| a - b).collect();
        let ys = dot(&y, &s);
        let step_vanished = max_abs(&s) <= cfg.tolerance_change;
        if ys > 1e-10 {
            self.push_pair(s, y, ys);
        }
        params.copy_from_slice(&trial);

        let converged = if max_abs(&g_new) <= cfg.tolerance_grad {
            Some(Convergence::GradientVanished)
        } else if (loss - f_new).abs() < cfg.tolerance_change as f64 {
            Some(Convergence::LossStalled)
        } else if step_vanished {
            Some(Convergence::StepVanished)
        } else {
            None
        };
        self.current = Some((f_new, g_new));
        Ok(report(f_new, evaluations, t, converged))
    }
}
