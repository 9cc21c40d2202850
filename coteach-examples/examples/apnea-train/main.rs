//! Co-teach two spectrogram classifiers on apnea segments.
//!
//! Datasets are safetensors files holding `features` (`[N, 1, F, T]`) and
//! `labels` (`[N]`, 0 or 1).

use std::path::PathBuf;

use anyhow::Context;
use candle::Device;
use clap::Parser;
use coteach_examples::SpectrogramNet;
use coteach_light::data::oversample_minority;
use coteach_light::{InMemoryDataset, MetricsReport, SegmentDataset, Trainer, TrainerConfig, TrainingUnit};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "apnea-train", about = "Co-teaching training for apnea detection")]
struct Args {
    /// Training set.
    #[arg(long)]
    train: PathBuf,

    /// Validation set.
    #[arg(long)]
    val: PathBuf,

    /// JSON trainer config. Flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// Maximum fraction of each batch to drop.
    #[arg(long)]
    forget_rate: Option<f64>,

    /// Epochs over which the forget rate ramps up.
    #[arg(long)]
    num_gradual: Option<usize>,

    /// Curvature of the forget-rate ramp (1.0 is linear). The ramp still ends
    /// at --forget-rate.
    #[arg(long)]
    ramp_power: Option<f64>,

    /// Where per-epoch and best checkpoints are written.
    #[arg(long, default_value = "checkpoints")]
    checkpoint_dir: PathBuf,

    /// Per-epoch CSV metrics report.
    #[arg(long, default_value = "metrics.csv")]
    report: PathBuf,

    #[arg(long, default_value = "coteach")]
    run_name: String,

    /// Resample the minority class up to the majority count.
    #[arg(long)]
    oversample: bool,

    /// Run on the CPU rather than on GPU.
    #[arg(long)]
    cpu: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let device = if args.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };

    let mut config = match &args.config {
        Some(path) => TrainerConfig::from_json_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => TrainerConfig::new(),
    };
    if let Some(epochs) = args.epochs {
        config = config.max_epochs(epochs);
    }
    if let Some(batch_size) = args.batch_size {
        config = config.batch_size(batch_size);
    }
    if let Some(lr) = args.learning_rate {
        config = config.learning_rate(lr);
    }
    let max_forget = args.forget_rate.unwrap_or(config.max_forget_rate);
    let gradual = args.num_gradual.unwrap_or(config.gradual_epochs);
    config = config.forget_rate(max_forget, gradual);
    if let Some(power) = args.ramp_power {
        config = config.ramp_power(power);
    }
    let config = config
        .checkpoint_dir(&args.checkpoint_dir)
        .run_name(args.run_name.clone())
        .device(device.clone());

    let mut train = InMemoryDataset::load(&args.train, &device)
        .with_context(|| format!("loading {}", args.train.display()))?;
    let val = InMemoryDataset::load(&args.val, &device)
        .with_context(|| format!("loading {}", args.val.display()))?;
    if args.oversample {
        let indices = oversample_minority(train.labels(), config.shuffle_seed);
        train = train.subset(&indices)?;
    }
    info!(train = train.len(), val = val.len(), ?device, "datasets loaded");

    let freq_bins = train.features().dim(2)?;
    let [seed_a, seed_b] = config.seeds;
    let mut model1 = TrainingUnit::adam("model1", SpectrogramNet::new(freq_bins, &device)?, seed_a, &config)?;
    let mut model2 = TrainingUnit::adam("model2", SpectrogramNet::new(freq_bins, &device)?, seed_b, &config)?;

    let mut trainer = Trainer::new(config).with_callback(MetricsReport::new(&args.report));
    let reports = trainer.fit(&mut model1, &mut model2, &train, &val)?;

    if let Some(last) = reports.last() {
        for m in &last.models {
            println!("epoch {} {}: {}", last.epoch, m.name, m.metrics);
        }
    }
    println!("{}", serde_json::to_string_pretty(&trainer.best())?);
    Ok(())
}
