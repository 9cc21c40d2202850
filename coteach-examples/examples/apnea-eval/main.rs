//! Score a checkpoint on whole recordings, before and after temporal smoothing.
//!
//! Each recording is a safetensors file with time-ordered `features` and
//! `labels`, one row per segment.

use std::path::PathBuf;

use anyhow::Context;
use candle::Device;
use clap::Parser;
use coteach_examples::SpectrogramNet;
use coteach_light::{
    evaluate_recordings, load_checkpoint, metrics::binarize, predict_sequence, BoundaryPolicy,
    Classifier, InMemoryDataset, Recording, TemporalSmoother,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "apnea-eval", about = "Evaluate an apnea checkpoint with temporal smoothing")]
struct Args {
    /// Model checkpoint (`*.safetensors`).
    #[arg(long)]
    checkpoint: PathBuf,

    /// One or more recordings.
    #[arg(long, required = true, num_args = 1..)]
    recording: Vec<PathBuf>,

    #[arg(long, default_value_t = 0.5)]
    threshold: f64,

    #[arg(long, default_value_t = 64)]
    batch_size: usize,

    /// Let a quiet run at the start or end of a recording count as enough
    /// evidence to clear an edge detection.
    #[arg(long)]
    quiet_edges: bool,

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

    let mut datasets = Vec::with_capacity(args.recording.len());
    for path in &args.recording {
        let data = InMemoryDataset::load(path, &device)
            .with_context(|| format!("loading {}", path.display()))?;
        datasets.push((path, data));
    }
    let (_, first) = datasets.first().context("no recordings given")?;
    let freq_bins = first.features().dim(2)?;

    let mut model = SpectrogramNet::new(freq_bins, &device)?;
    let mut varmap = model.varmap().clone();
    load_checkpoint(&mut varmap, &args.checkpoint)?;
    model.set_training(false);

    let mut recordings = Vec::with_capacity(datasets.len());
    for (path, data) in &datasets {
        let predictions = predict_sequence(&model, data.features(), args.threshold, args.batch_size)?;
        let labels = binarize(data.labels(), 0.5);
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        info!(recording = %name, segments = labels.len(), "predicted");
        recordings.push(Recording::new(name, predictions, labels)?);
    }

    let boundary = if args.quiet_edges {
        BoundaryPolicy::CountsAsQuiet
    } else {
        BoundaryPolicy::InsufficientEvidence
    };
    let smoother = TemporalSmoother::new().boundary(boundary);
    let eval = evaluate_recordings(&recordings, &smoother)?;

    println!("raw:      {}", eval.raw);
    println!("smoothed: {}", eval.smoothed);
    println!("{}", serde_json::to_string_pretty(&eval)?);
    Ok(())
}
