//! stylestat: neural style transfer with selectable feature statistics
//!
//! Usage:
//!   stylestat run --content beethoven.jpg --style starry_night.jpg --kind gramian --shift 100
//!   stylestat sweep --config sweep.json
//!   stylestat print-config > sweep.json

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueHint};
use std::path::PathBuf;
use stylestat::core::Device;
use stylestat::extract::{PoolKind, Vgg19};
use stylestat::io::load_normalized;
use stylestat::optim::SynthesisConfig;
use stylestat::stats::StatisticKind;
use stylestat::sweep::{run_sweep, synthesize_to_file, SweepConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "Neural style transfer with mean/Gramian/variance/covariance style statistics")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Synthesize a single content/style pair
    Run(RunArgs),

    /// Run every configuration of a sweep file and write summary.json
    Sweep(SweepArgs),

    /// Print the default sweep configuration as JSON
    PrintConfig,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, value_hint = ValueHint::FilePath)]
    content: PathBuf,

    #[arg(long, value_hint = ValueHint::FilePath)]
    style: PathBuf,

    /// Output image (format from extension)
    #[arg(long, short, value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Backbone weights (.vggw)
    #[arg(long, default_value = "vgg_conv.vggw", value_hint = ValueHint::FilePath)]
    weights: PathBuf,

    /// Synthesis settings as JSON; flags below override it
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// raw, mean, gramian, variance or covariance
    #[arg(long)]
    kind: Option<StatisticKind>,

    #[arg(long, allow_hyphen_values = true)]
    shift: Option<f32>,

    #[arg(long)]
    iterations: Option<usize>,

    /// Shorter image side in pixels
    #[arg(long, default_value_t = 512)]
    size: u32,

    #[arg(long, default_value_t = PoolKind::Max)]
    pool: PoolKind,

    #[arg(long)]
    device: Option<Device>,
}

#[derive(Args)]
struct SweepArgs {
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: PathBuf,

    /// Run configurations concurrently (overrides the file)
    #[arg(long)]
    parallel: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn synthesis_config(args: &RunArgs) -> anyhow::Result<SynthesisConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("opening synthesis config {}", path.display()))?;
            serde_json::from_reader(file)
                .with_context(|| format!("parsing synthesis config {}", path.display()))?
        }
        None => SynthesisConfig::default(),
    };
    if let Some(kind) = args.kind {
        cfg.statistic.kind = kind;
    }
    if let Some(shift) = args.shift {
        cfg.statistic.shift = shift;
    }
    if let Some(iterations) = args.iterations {
        cfg.max_iterations = iterations;
    }
    if let Some(device) = args.device {
        cfg.device = device;
    }
    Ok(cfg)
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    let cfg = synthesis_config(&args)?;
    let vgg = Vgg19::load(&args.weights, args.pool)
        .with_context(|| format!("loading weights {}", args.weights.display()))?;
    let content = load_normalized(&args.content, args.size)?;
    let style = load_normalized(&args.style, args.size)?;

    info!(
        statistic = %cfg.statistic,
        iterations = cfg.max_iterations,
        "synthesizing {}",
        args.output.display()
    );
    let result = synthesize_to_file(&vgg, &content, &style, &cfg, &args.output)
        .with_context(|| format!("synthesizing {}", args.output.display()))?;
    info!(
        iterations = result.iterations,
        loss = result.final_loss(),
        "saved {}",
        args.output.display()
    );
    Ok(())
}

fn sweep(args: SweepArgs) -> anyhow::Result<()> {
    let mut cfg = SweepConfig::load(&args.config)?;
    cfg.parallel |= args.parallel;
    let vgg = Vgg19::load(&cfg.weights_path, cfg.pool)
        .with_context(|| format!("loading weights {}", cfg.weights_path.display()))?;
    let summary = run_sweep(&vgg, &cfg)?;
    if summary.failed() > 0 {
        info!(
            failed = summary.failed(),
            total = summary.runs.len(),
            "some configurations failed; see summary.json"
        );
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    match Cli::parse().command {
        Command::Run(args) => run(args),
        Command::Sweep(args) => sweep(args),
        Command::PrintConfig => {
            println!("{}", serde_json::to_string_pretty(&SweepConfig::default())?);
            Ok(())
        }
    }
}
