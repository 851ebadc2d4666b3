//! The synthesis loop.
//!
//! `Synthesis::new` is the initializing phase: it measures the style and
//! content targets once through the extractor, binds them to `LayerLoss`es
//! and copies the content image into the canvas. After that the run is a
//! two-state machine (`Iterating` until the budget or convergence, then
//! `Done`). The iteration counter is owned by the loop and advances once
//! per optimizer step, however many objective evaluations the line search
//! needs.

use super::lbfgs::{Convergence, Lbfgs, LbfgsConfig};
use super::loss::LayerLoss;
use crate::core::{denormalize, Device, FeatureMap, ShapeError};
use crate::extract::{Activations, ExtractError, FeatureExtractor};
use crate::stats::{Statistic, StatisticKind, StatsError};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("invalid synthesis configuration: {0}")]
    Config(String),

    #[error("non-finite loss or gradient at iteration {iteration} (loss = {loss})")]
    NonFinite { iteration: usize, loss: f64 },

    #[error(transparent)]
    Stats(#[from] StatsError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Shape(#[from] ShapeError),
}

fn layers(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub style_layers: Vec<String>,
    pub content_layers: Vec<String>,
    /// Weight of every style layer unless `style_weights` is given.
    pub style_weight: f32,
    /// Weight of every content layer unless `content_weights` is given.
    pub content_weight: f32,
    pub style_weights: Option<Vec<f32>>,
    pub content_weights: Option<Vec<f32>>,
    pub max_iterations: usize,
    /// Log the loss every this many steps (0 disables).
    pub report_interval: usize,
    /// Statistic matched at the style layers. Content layers always use `raw`.
    pub statistic: Statistic,
    pub lbfgs: LbfgsConfig,
    pub device: Device,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            style_layers: layers(&["r11", "r21", "r31", "r41", "r51"]),
            content_layers: layers(&["r42"]),
            style_weight: 1e3,
            content_weight: 1.0,
            style_weights: None,
            content_weights: None,
            max_iterations: 500,
            report_interval: 20,
            statistic: Statistic::default(),
            lbfgs: LbfgsConfig::default(),
            device: Device::Cpu,
        }
    }
}

fn expand_weights(
    what: &str,
    layers: &[String],
    uniform: f32,
    explicit: Option<&[f32]>,
) -> Result<Vec<f32>, SynthesisError> {
    let weights = match explicit {
        Some(w) if w.len() != layers.len() => {
            return Err(SynthesisError::Config(format!(
                "{} {what} weights given for {} {what} layers",
                w.len(),
                layers.len()
            )))
        }
        Some(w) => w.to_vec(),
        None => vec![uniform; layers.len()],
    };
    if let Some(bad) = weights.iter().find(|w| !(w.is_finite() && **w > 0.0)) {
        return Err(SynthesisError::Config(format!(
            "{what} weights must be positive and finite, got {bad}"
        )));
    }
    Ok(weights)
}

impl SynthesisConfig {
    /// Per-layer style weights, in `style_layers` order.
    pub fn resolved_style_weights(&self) -> Result<Vec<f32>, SynthesisError> {
        expand_weights("style", &self.style_layers, self.style_weight, self.style_weights.as_deref())
    }

    /// Per-layer content weights, in `content_layers` order.
    pub fn resolved_content_weights(&self) -> Result<Vec<f32>, SynthesisError> {
        expand_weights(
            "content",
            &self.content_layers,
            self.content_weight,
            self.content_weights.as_deref(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Iterating,
    Done,
}

/// One weighted layer loss.
#[derive(Debug, Clone)]
struct Binding {
    layer: String,
    loss: LayerLoss,
    weight: f32,
}

/// Total loss as a function of the canvas pixels.
#[derive(Debug, Clone)]
struct Objective {
    layers: Vec<String>,
    bindings: Vec<Binding>,
    dims: [usize; 3],
}

impl Objective {
    fn evaluate<E: FeatureExtractor>(
        &self,
        extractor: &E,
        pixels: &[f32],
        iteration: usize,
    ) -> Result<(f64, Vec<f32>), SynthesisError> {
        let [c, h, w] = self.dims;
        let image = FeatureMap::new(c, h, w, pixels.to_vec())?;
        let trace = extractor.forward(&image, &self.layers)?;

        let mut total = 0.0f64;
        let mut grads: HashMap<String, FeatureMap> = HashMap::new();
        for b in &self.bindings {
            let act = trace
                .get(&b.layer)
                .ok_or_else(|| ExtractError::NotComputed(b.layer.clone()))?;
            let (loss, mut grad) = b.loss.evaluate_with_grad(act)?;
            total += b.weight as f64 * loss;
            grad.scale(b.weight);
            match grads.entry(b.layer.clone()) {
                Entry::Occupied(mut e) => e.get_mut().add_assign(&grad)?,
                Entry::Vacant(e) => {
                    e.insert(grad);
                }
            }
        }

        let grad = extractor.backward(&trace, &grads)?;
        if !total.is_finite() || !grad.is_finite() {
            return Err(SynthesisError::NonFinite { iteration, loss: total });
        }
        Ok((total, grad.into_vec()))
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    /// Displayable result (denormalized canvas).
    pub image: RgbImage,
    /// Final canvas in the extractor's working representation.
    pub canvas: FeatureMap,
    /// Total loss after each step.
    pub loss_history: Vec<f64>,
    pub iterations: usize,
    pub converged: Option<Convergence>,
}

impl SynthesisOutput {
    pub fn final_loss(&self) -> Option<f64> {
        self.loss_history.last().copied()
    }
}

pub struct Synthesis<'a, E: FeatureExtractor> {
    extractor: &'a E,
    objective: Objective,
    optimizer: Lbfgs,
    canvas: FeatureMap,
    max_iterations: usize,
    report_interval: usize,
    device: Device,
    iteration: usize,
    phase: Phase,
    loss_history: Vec<f64>,
    converged: Option<Convergence>,
}

impl<'a, E: FeatureExtractor> Synthesis<'a, E> {
    /// Measure targets and set up the canvas.
    ///
    /// `content` and `style` are normalized images. Fails before any
    /// optimization on unknown layers, bad weights, or images the extractor
    /// rejects.
    pub fn new(
        extractor: &'a E,
        content: &FeatureMap,
        style: &FeatureMap,
        config: &SynthesisConfig,
    ) -> Result<Self, SynthesisError> {
        content.require_channels(3)?;
        style.require_channels(3)?;
        let style_weights = config.resolved_style_weights()?;
        let content_weights = config.resolved_content_weights()?;
        if config.style_layers.is_empty() && config.content_layers.is_empty() {
            return Err(SynthesisError::Config("no style or content layers configured".into()));
        }
        if config.statistic.kind == StatisticKind::Raw
            && !config.style_layers.is_empty()
            && !content.same_shape(style)
        {
            return Err(SynthesisError::Config(format!(
                "raw style matching needs equal image shapes, content {:?} vs style {:?}",
                content.dims(),
                style.dims()
            )));
        }
        extractor.check_layers(&config.style_layers)?;
        extractor.check_layers(&config.content_layers)?;

        let device = config.device.resolve();

        let style_acts = extractor.extract(style, &config.style_layers)?;
        let content_acts = extractor.extract(content, &config.content_layers)?;

        let mut bindings = Vec::with_capacity(style_weights.len() + content_weights.len());
        for (layer, &weight) in config.style_layers.iter().zip(&style_weights) {
            let act = style_acts
                .get(layer)
                .ok_or_else(|| ExtractError::NotComputed(layer.clone()))?;
            bindings.push(Binding {
                layer: layer.clone(),
                loss: LayerLoss::new(config.statistic, act),
                weight,
            });
        }
        for (layer, &weight) in config.content_layers.iter().zip(&content_weights) {
            let act = content_acts
                .get(layer)
                .ok_or_else(|| ExtractError::NotComputed(layer.clone()))?;
            bindings.push(Binding {
                layer: layer.clone(),
                loss: LayerLoss::new(Statistic::raw(), act),
                weight,
            });
        }

        let mut union: Vec<String> = Vec::new();
        for l in config.style_layers.iter().chain(&config.content_layers) {
            if !union.contains(l) {
                union.push(l.clone());
            }
        }

        debug!(
            statistic = %config.statistic,
            layers = ?union,
            %device,
            "synthesis initialized"
        );

        let phase = if config.max_iterations == 0 {
            Phase::Done
        } else {
            Phase::Iterating
        };

        Ok(Self {
            extractor,
            objective: Objective {
                layers: union,
                bindings,
                dims: content.dims(),
            },
            optimizer: Lbfgs::new(config.lbfgs),
            canvas: content.clone(),
            max_iterations: config.max_iterations,
            report_interval: config.report_interval,
            device,
            iteration: 0,
            phase,
            loss_history: Vec::new(),
            converged: None,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn canvas(&self) -> &FeatureMap {
        &self.canvas
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn loss_history(&self) -> &[f64] {
        &self.loss_history
    }

    /// Objective evaluations so far, including line-search trials.
    pub fn evaluations(&self) -> usize {
        self.optimizer.evaluations()
    }

    /// Total loss at the current canvas (no optimizer state touched).
    pub fn current_loss(&self) -> Result<f64, SynthesisError> {
        let (loss, _) = self
            .objective
            .evaluate(self.extractor, self.canvas.as_slice(), self.iteration)?;
        Ok(loss)
    }

    /// One optimizer step. Returns the total loss after it.
    ///
    /// A step in `Done` is a no-op returning the last loss.
    pub fn step(&mut self) -> Result<f64, SynthesisError> {
        if self.phase == Phase::Done {
            return match self.loss_history.last() {
                Some(&l) => Ok(l),
                None => self.current_loss(),
            };
        }

        let iteration = self.iteration + 1;
        let extractor = self.extractor;
        let objective = &self.objective;
        let report = self
            .optimizer
            .step(self.canvas.as_mut_slice(), |x| objective.evaluate(extractor, x, iteration))?;

        self.iteration = iteration;
        self.loss_history.push(report.loss);

        if self.report_interval > 0 && iteration % self.report_interval == 0 {
            info!(iteration, loss = report.loss, "synthesis progress");
        }
        debug!(
            iteration,
            loss = report.loss,
            evaluations = report.evaluations,
            step = report.step_length,
            "step"
        );

        if let Some(reason) = report.converged {
            info!(iteration, ?reason, "optimizer converged");
            self.converged = Some(reason);
            self.phase = Phase::Done;
        } else if self.iteration >= self.max_iterations {
            self.phase = Phase::Done;
        }
        Ok(report.loss)
    }

    /// Iterate until done and emit the image.
    pub fn run(mut self) -> Result<SynthesisOutput, SynthesisError> {
        while self.phase == Phase::Iterating {
            self.step()?;
        }
        self.finish()
    }

    /// Convert the canvas to a displayable image.
    pub fn finish(self) -> Result<SynthesisOutput, SynthesisError> {
        let image = denormalize(&self.canvas)?;
        Ok(SynthesisOutput {
            image,
            canvas: self.canvas,
            loss_history: self.loss_history,
            iterations: self.iteration,
            converged: self.converged,
        })
    }
}
