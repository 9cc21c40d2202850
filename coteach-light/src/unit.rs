//! One peer of a co-teaching pair: model, optimizer and LR scheduler.

use candle::Tensor;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};

use crate::config::TrainerConfig;
use crate::data::Batch;
use crate::error::CoTeachResult;
use crate::loss::{binary_cross_entropy, binary_cross_entropy_mean};
use crate::module::{reseed, Classifier};
use crate::scheduler::ReduceLrOnPlateau;

/// Everything one peer owns. Nothing in here is shared with the other peer.
pub struct TrainingUnit<M, O> {
    name: String,
    model: M,
    optimizer: O,
    scheduler: ReduceLrOnPlateau,
}

impl<M: Classifier, O: Optimizer> TrainingUnit<M, O> {
    pub fn new(name: impl Into<String>, model: M, optimizer: O, scheduler: ReduceLrOnPlateau) -> Self {
        Self {
            name: name.into(),
            model,
            optimizer,
            scheduler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    pub fn set_training(&mut self, training: bool) {
        self.model.set_training(training);
    }

    /// Unreduced per-sample losses on the whole batch. Does not touch parameters.
    pub fn sample_losses(&self, batch: &Batch) -> CoTeachResult<Vec<f32>> {
        let probs = self.model.forward(&batch.features)?.detach();
        let losses = binary_cross_entropy(&probs, &batch.labels)?;
        Ok(losses.to_vec1::<f32>()?)
    }

    /// Forward the rows at `indices`, back-propagate their mean loss and step the
    /// optimizer. An empty index set is a no-op and reports `None`.
    pub fn update_on(&mut self, batch: &Batch, indices: &[u32]) -> CoTeachResult<Option<f32>> {
        if indices.is_empty() {
            return Ok(None);
        }
        let selected = batch.select(indices)?;
        let probs = self.model.forward(&selected.features)?;
        let loss = binary_cross_entropy_mean(&probs, &selected.labels)?;
        self.optimizer.backward_step(&loss)?;
        Ok(Some(loss.to_scalar::<f32>()?))
    }

    /// Detached probabilities for `features`, flattened to `[N]`.
    pub fn probabilities(&self, features: &Tensor) -> CoTeachResult<Tensor> {
        Ok(self.model.forward(features)?.detach().flatten_all()?)
    }

    /// Feed the epoch-mean loss to the plateau scheduler. Undefined or
    /// non-finite losses skip the step. Returns the new rate when it changed.
    pub fn step_scheduler(&mut self, epoch_loss: Option<f64>) -> Option<f64> {
        let loss = epoch_loss.filter(|l| l.is_finite())?;
        let new_lr = self.scheduler.step(loss, self.optimizer.learning_rate())?;
        self.optimizer.set_learning_rate(new_lr);
        Some(new_lr)
    }
}

impl<M: Classifier> TrainingUnit<M, AdamW> {
    /// Reseed `model`, then pair it with Adam (AdamW without weight decay) and a
    /// plateau scheduler, all taken from `config`.
    pub fn adam(name: impl Into<String>, model: M, seed: u64, config: &TrainerConfig) -> CoTeachResult<Self> {
        reseed(model.varmap(), seed)?;
        let params = ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let optimizer = AdamW::new(model.parameters(), params)?;
        let scheduler = ReduceLrOnPlateau::new()
            .factor(config.lr_factor)
            .patience(config.lr_patience)
            .threshold(config.lr_threshold)
            .min_lr(config.min_lr);
        Ok(Self::new(name, model, optimizer, scheduler))
    }
}
