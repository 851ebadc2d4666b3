//! Sweeps over (content, style, statistic kind, shift).
//!
//! Every configuration gets its own canvas and layer losses; images and the
//! extractor are loaded once and shared read-only. A failing configuration
//! is logged and recorded in `summary.json`, and the sweep moves on.

use crate::core::FeatureMap;
use crate::extract::{FeatureExtractor, PoolKind};
use crate::io::{load_normalized, output_file_name, save_rgb};
use crate::optim::{Synthesis, SynthesisConfig, SynthesisOutput};
use crate::stats::{Statistic, StatisticKind};
use anyhow::{anyhow, Context};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{error, info};

pub const SUMMARY_FILE: &str = "summary.json";

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Directory holding `{name}.{image_extension}` inputs.
    pub image_dir: PathBuf,
    pub weights_path: PathBuf,
    pub output_dir: PathBuf,
    pub contents: Vec<String>,
    pub styles: Vec<String>,
    pub kinds: Vec<StatisticKind>,
    /// Shift values per kind; kinds not listed use `default_shifts`.
    pub shifts: BTreeMap<StatisticKind, Vec<f32>>,
    pub default_shifts: Vec<f32>,
    pub image_size: u32,
    pub pool: PoolKind,
    pub image_extension: String,
    /// Run configurations concurrently.
    pub parallel: bool,
    pub synthesis: SynthesisConfig,
}

impl Default for SweepConfig {
    fn default() -> Self {
        let gramian_shifts = (-6..=6).map(|i| (i * 100) as f32).collect();
        Self {
            image_dir: PathBuf::from("images"),
            weights_path: PathBuf::from("vgg_conv.vggw"),
            output_dir: PathBuf::from("output"),
            contents: names(&["beethoven", "church", "fate"]),
            styles: names(&["starry_night", "face", "ice"]),
            kinds: vec![
                StatisticKind::Mean,
                StatisticKind::Gramian,
                StatisticKind::Variance,
                StatisticKind::Covariance,
            ],
            shifts: BTreeMap::from([(StatisticKind::Gramian, gramian_shifts)]),
            default_shifts: vec![0.0],
            image_size: 512,
            pool: PoolKind::Max,
            image_extension: "jpg".to_string(),
            parallel: false,
            synthesis: SynthesisConfig::default(),
        }
    }
}

impl SweepConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("opening sweep config {}", path.display()))?;
        serde_json::from_reader(file).with_context(|| format!("parsing sweep config {}", path.display()))
    }

    pub fn shifts_for(&self, kind: StatisticKind) -> &[f32] {
        self.shifts
            .get(&kind)
            .map_or(self.default_shifts.as_slice(), Vec::as_slice)
    }

    pub fn image_path(&self, name: &str) -> PathBuf {
        self.image_dir.join(format!("{name}.{}", self.image_extension))
    }

    pub fn output_path(&self, run: &RunSpec) -> PathBuf {
        self.output_dir.join(output_file_name(
            &run.content,
            &run.style,
            run.statistic.kind,
            run.statistic.shift,
            &self.image_extension,
        ))
    }

    /// Every configuration, content-major.
    pub fn plan(&self) -> Vec<RunSpec> {
        let mut runs = Vec::new();
        for content in &self.contents {
            for style in &self.styles {
                for &kind in &self.kinds {
                    for &shift in self.shifts_for(kind) {
                        runs.push(RunSpec {
                            content: content.clone(),
                            style: style.clone(),
                            statistic: Statistic::new(kind, shift),
                        });
                    }
                }
            }
        }
        runs
    }
}

/// One point of the sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    pub content: String,
    pub style: String,
    pub statistic: Statistic,
}

impl fmt::Display for RunSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "content={} style={} kind={} shift={}",
            self.content, self.style, self.statistic.kind, self.statistic.shift
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunStatus {
    Ok {
        final_loss: Option<f64>,
        iterations: usize,
        output: PathBuf,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub content: String,
    pub style: String,
    pub kind: StatisticKind,
    pub shift: f32,
    #[serde(flatten)]
    pub status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub started: String,
    pub finished: String,
    pub runs: Vec<RunRecord>,
}

impl SweepSummary {
    pub fn succeeded(&self) -> usize {
        self.runs
            .iter()
            .filter(|r| matches!(r.status, RunStatus::Ok { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.runs.len() - self.succeeded()
    }
}

fn now_rfc3339() -> anyhow::Result<String> {
    Ok(OffsetDateTime::now_utc().format(&Rfc3339)?)
}

/// Synthesize one pair and write the result to `output`.
pub fn synthesize_to_file<E: FeatureExtractor>(
    extractor: &E,
    content: &FeatureMap,
    style: &FeatureMap,
    config: &SynthesisConfig,
    output: &Path,
) -> anyhow::Result<SynthesisOutput> {
    let result = Synthesis::new(extractor, content, style, config)?.run()?;
    save_rgb(&result.image, output)?;
    Ok(result)
}

type ImageCache = HashMap<String, Result<FeatureMap, String>>;

fn load_images(cfg: &SweepConfig) -> ImageCache {
    let mut cache = ImageCache::new();
    for name in cfg.contents.iter().chain(&cfg.styles) {
        if cache.contains_key(name) {
            continue;
        }
        let loaded = load_normalized(&cfg.image_path(name), cfg.image_size).map_err(|e| {
            error!(image = %name, error = %e, "cannot load image");
            e.to_string()
        });
        cache.insert(name.clone(), loaded);
    }
    cache
}

fn cached<'c>(cache: &'c ImageCache, name: &str) -> anyhow::Result<&'c FeatureMap> {
    match cache.get(name) {
        Some(Ok(img)) => Ok(img),
        Some(Err(reason)) => Err(anyhow!("{reason}")),
        None => Err(anyhow!("image '{name}' was not loaded")),
    }
}

fn run_one<E: FeatureExtractor>(
    extractor: &E,
    cfg: &SweepConfig,
    images: &ImageCache,
    run: &RunSpec,
) -> RunRecord {
    let attempt = || -> anyhow::Result<RunStatus> {
        let content = cached(images, &run.content).context("content image")?;
        let style = cached(images, &run.style).context("style image")?;
        let synthesis = SynthesisConfig {
            statistic: run.statistic,
            ..cfg.synthesis.clone()
        };
        let output = cfg.output_path(run);
        let result = synthesize_to_file(extractor, content, style, &synthesis, &output)
            .with_context(|| format!("synthesizing {run}"))?;
        info!(
            %run,
            iterations = result.iterations,
            loss = result.final_loss(),
            output = %output.display(),
            "configuration finished"
        );
        Ok(RunStatus::Ok {
            final_loss: result.final_loss(),
            iterations: result.iterations,
            output,
        })
    };

    let status = attempt().unwrap_or_else(|e| {
        error!(
            content = %run.content,
            style = %run.style,
            kind = %run.statistic.kind,
            shift = run.statistic.shift,
            error = %format!("{e:#}"),
            "configuration failed"
        );
        RunStatus::Failed {
            reason: format!("{e:#}"),
        }
    });

    RunRecord {
        content: run.content.clone(),
        style: run.style.clone(),
        kind: run.statistic.kind,
        shift: run.statistic.shift,
        status,
    }
}

/// Run every configuration of `cfg` and write `summary.json`.
///
/// Only failures that affect the whole sweep (output directory, summary
/// file) are returned as errors.
pub fn run_sweep<E: FeatureExtractor>(extractor: &E, cfg: &SweepConfig) -> anyhow::Result<SweepSummary> {
    let started = now_rfc3339()?;
    std::fs::create_dir_all(&cfg.output_dir)
        .with_context(|| format!("creating output directory {}", cfg.output_dir.display()))?;

    let plan = cfg.plan();
    info!(configurations = plan.len(), parallel = cfg.parallel, "starting sweep");

    let images = load_images(cfg);
    let runs: Vec<RunRecord> = if cfg.parallel {
        plan.par_iter()
            .map(|run| run_one(extractor, cfg, &images, run))
            .collect()
    } else {
        plan.iter()
            .map(|run| run_one(extractor, cfg, &images, run))
            .collect()
    };

    let summary = SweepSummary {
        started,
        finished: now_rfc3339()?,
        runs,
    };

    let path = cfg.output_dir.join(SUMMARY_FILE);
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &summary)
        .with_context(|| format!("writing {}", path.display()))?;

    info!(
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        summary = %path.display(),
        "sweep finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan_size() {
        let cfg = SweepConfig::default();
        // 3 contents × 3 styles × (mean + 13 gramian shifts + variance + covariance)
        assert_eq!(cfg.plan().len(), 144);
        assert_eq!(cfg.shifts_for(StatisticKind::Gramian).first(), Some(&-600.0));
        assert_eq!(cfg.shifts_for(StatisticKind::Gramian).last(), Some(&600.0));
        assert_eq!(cfg.shifts_for(StatisticKind::Mean).to_vec(), vec![0.0f32]);
    }

    #[test]
    fn test_plan_order_and_output_names() {
        let cfg = SweepConfig::default();
        let plan = cfg.plan();
        assert_eq!(plan[0].content, "beethoven");
        assert_eq!(plan[0].style, "starry_night");
        assert_eq!(plan[0].statistic, Statistic::new(StatisticKind::Mean, 0.0));
        assert_eq!(plan[1].statistic, Statistic::gramian(-600.0));
        assert_eq!(
            cfg.output_path(&plan[1]),
            PathBuf::from("output/beethoven_starry_night_gramian_-600.0.jpg")
        );
    }

    #[test]
    fn test_config_json_roundtrip_and_partial() {
        let cfg = SweepConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains(r#""gramian":[-600.0"#));
        let back: SweepConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);

        let partial: SweepConfig = serde_json::from_str(r#"{"contents": ["a"], "kinds": ["variance"]}"#).unwrap();
        assert_eq!(partial.plan().len(), 3);
        assert_eq!(partial.image_size, 512);
    }

    #[test]
    fn test_record_serialization() {
        let rec = RunRecord {
            content: "a".into(),
            style: "b".into(),
            kind: StatisticKind::Covariance,
            shift: 0.0,
            status: RunStatus::Failed {
                reason: "boom".into(),
            },
        };
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["reason"], "boom");
        assert_eq!(v["kind"], "covariance");
    }
}
