//! Trainer configuration.

use std::path::{Path, PathBuf};

use candle::Device;
use serde::{Deserialize, Serialize};

use crate::error::{CoTeachError, CoTeachResult};

fn default_device() -> Device {
    Device::Cpu
}

/// Hyperparameters for a co-teaching run.
///
/// Defaults reproduce the reference apnea experiment: 150 epochs, batches of
/// 64, Adam at 0.01 and a forget rate ramping to 0.3 over the first 30 epochs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub max_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Fraction of every batch dropped once the ramp is over.
    pub max_forget_rate: f64,
    /// Epochs spent ramping the forget rate up from zero.
    pub gradual_epochs: usize,
    /// Curvature of the forget-rate ramp, 1.0 is linear. It never moves the
    /// end point, which is always `max_forget_rate`.
    pub ramp_power: f64,
    /// Multiplier applied to the learning rate on a plateau.
    pub lr_factor: f64,
    /// Epochs without improvement tolerated before reducing the learning rate.
    pub lr_patience: usize,
    /// Relative improvement required to reset the plateau counter.
    pub lr_threshold: f64,
    pub min_lr: f64,
    /// Probability at or above which a segment is classified as apnea.
    pub decision_threshold: f64,
    /// Initialisation seeds of the two peer models.
    pub seeds: [u64; 2],
    pub shuffle_seed: u64,
    /// F1 a model must beat before its first "best" checkpoint is written.
    pub initial_best_f1: f64,
    /// Where checkpoints are written. `None` disables persistence.
    pub checkpoint_dir: Option<PathBuf>,
    /// Prefix of every checkpoint file name.
    pub run_name: String,
    pub log_every_n_steps: usize,
    #[serde(skip, default = "default_device")]
    pub device: Device,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_epochs: 150,
            batch_size: 64,
            learning_rate: 0.01,
            max_forget_rate: 0.3,
            gradual_epochs: 30,
            ramp_power: 1.0,
            lr_factor: 0.1,
            lr_patience: 5,
            lr_threshold: 1e-4,
            min_lr: 0.0,
            decision_threshold: 0.5,
            seeds: [128, 12],
            shuffle_seed: 42,
            initial_best_f1: 0.001,
            checkpoint_dir: None,
            run_name: "coteach".to_string(),
            log_every_n_steps: 50,
            device: Device::Cpu,
        }
    }
}

impl TrainerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON config; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> CoTeachResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the trainer cannot honour.
    pub fn validate(&self) -> CoTeachResult<()> {
        if !(0.0..=1.0).contains(&self.max_forget_rate) {
            return Err(CoTeachError::invalid_config(format!(
                "max_forget_rate must be in [0, 1], got {}",
                self.max_forget_rate
            )));
        }
        if !self.ramp_power.is_finite() || self.ramp_power <= 0.0 {
            return Err(CoTeachError::invalid_config(format!(
                "ramp_power must be positive, got {}",
                self.ramp_power
            )));
        }
        if self.batch_size == 0 {
            return Err(CoTeachError::invalid_config("batch_size must be at least 1"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(CoTeachError::invalid_config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.lr_factor > 0.0 && self.lr_factor < 1.0) {
            return Err(CoTeachError::invalid_config(format!(
                "lr_factor must be in (0, 1), got {}",
                self.lr_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.decision_threshold) {
            return Err(CoTeachError::invalid_config(format!(
                "decision_threshold must be in [0, 1], got {}",
                self.decision_threshold
            )));
        }
        Ok(())
    }

    pub fn max_epochs(mut self, epochs: usize) -> Self {
        self.max_epochs = epochs;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn forget_rate(mut self, max_forget_rate: f64, gradual_epochs: usize) -> Self {
        self.max_forget_rate = max_forget_rate;
        self.gradual_epochs = gradual_epochs;
        self
    }

    pub fn ramp_power(mut self, ramp_power: f64) -> Self {
        self.ramp_power = ramp_power;
        self
    }

    pub fn plateau(mut self, factor: f64, patience: usize) -> Self {
        self.lr_factor = factor;
        self.lr_patience = patience;
        self
    }

    pub fn decision_threshold(mut self, threshold: f64) -> Self {
        self.decision_threshold = threshold;
        self
    }

    pub fn seeds(mut self, seed_a: u64, seed_b: u64) -> Self {
        self.seeds = [seed_a, seed_b];
        self
    }

    pub fn shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = seed;
        self
    }

    pub fn initial_best_f1(mut self, f1: f64) -> Self {
        self.initial_best_f1 = f1;
        self
    }

    pub fn checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    pub fn run_name(mut self, name: impl Into<String>) -> Self {
        self.run_name = name.into();
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn log_every_n_steps(mut self, n: usize) -> Self {
        self.log_every_n_steps = n;
        self
    }
}
