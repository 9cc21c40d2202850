//! Callback system for training hooks.

mod checkpoint;
mod report;

pub use checkpoint::{load_checkpoint, BestScore, CheckpointSelector, CheckpointStore};
pub use report::MetricsReport;

use std::path::PathBuf;

use serde::Serialize;

use crate::error::CoTeachResult;
use crate::metrics::BinaryMetrics;
use crate::step::StepLosses;
use crate::Trainer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Min,
    Max,
}

/// End-of-epoch state of one peer.
#[derive(Clone, Debug, Serialize)]
pub struct ModelReport {
    pub name: String,
    /// Mean co-teaching loss over the batches that performed an update.
    /// `None` when no batch updated this peer.
    pub train_loss: Option<f64>,
    /// Validation metrics on the held-out set.
    pub metrics: BinaryMetrics,
    /// Learning rate after this epoch's scheduler step.
    pub learning_rate: f64,
    /// Per-epoch checkpoint, when persistence is enabled.
    pub checkpoint: Option<PathBuf>,
    /// This peer set a new best F1 this epoch.
    pub is_best: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub forget_rate: f64,
    pub models: [ModelReport; 2],
    /// Best score after this epoch.
    pub best: BestScore,
}

pub trait Callback: Send {
    fn on_fit_start(&mut self, _trainer: &Trainer) -> CoTeachResult<()> {
        Ok(())
    }

    fn on_fit_end(&mut self, _trainer: &Trainer) -> CoTeachResult<()> {
        Ok(())
    }

    fn on_epoch_start(&mut self, _trainer: &Trainer, _epoch: usize) -> CoTeachResult<()> {
        Ok(())
    }

    fn on_epoch_end(&mut self, _trainer: &Trainer, _report: &EpochReport) -> CoTeachResult<()> {
        Ok(())
    }

    fn on_train_batch_end(
        &mut self,
        _trainer: &Trainer,
        _batch_idx: usize,
        _losses: &StepLosses,
    ) -> CoTeachResult<()> {
        Ok(())
    }

    fn should_stop(&self) -> bool {
        false
    }
}
