//! Co-teaching training loop.

use candle_nn::Optimizer;
use tracing::{debug, info, warn};

use crate::callbacks::{
    BestScore, Callback, CheckpointSelector, CheckpointStore, EpochReport, ModelReport,
};
use crate::data::{BatchIterator, SegmentDataset};
use crate::error::{CoTeachError, CoTeachResult};
use crate::metrics::{BinaryMetrics, Metric, ThresholdF1};
use crate::module::Classifier;
use crate::schedule::{ForgetRateSchedule, LinearRamp};
use crate::step::co_teaching_step;
use crate::unit::TrainingUnit;
use crate::TrainerConfig;

pub struct Trainer {
    config: TrainerConfig,
    schedule: Box<dyn ForgetRateSchedule>,
    selector: CheckpointSelector,
    store: Option<CheckpointStore>,
    callbacks: Vec<Box<dyn Callback>>,
}

/// Running mean over the batches that actually produced a loss.
#[derive(Default)]
struct LossMean {
    sum: f64,
    count: usize,
}

impl LossMean {
    fn push(&mut self, loss: Option<f32>) {
        if let Some(l) = loss {
            self.sum += l as f64;
            self.count += 1;
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        let schedule = LinearRamp::new(config.max_forget_rate, config.gradual_epochs)
            .power(config.ramp_power);
        let store = config
            .checkpoint_dir
            .as_ref()
            .map(|dir| CheckpointStore::new(dir, config.run_name.clone()));
        let mut selector = CheckpointSelector::new(config.initial_best_f1);
        if let Some(store) = &store {
            selector = selector.with_store(store.clone());
        }
        Self {
            config,
            schedule: Box::new(schedule),
            selector,
            store,
            callbacks: Vec::new(),
        }
    }

    pub fn with_schedule(mut self, schedule: impl ForgetRateSchedule + 'static) -> Self {
        self.schedule = Box::new(schedule);
        self
    }

    pub fn with_callback(mut self, callback: impl Callback + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn best(&self) -> BestScore {
        self.selector.best()
    }

    pub fn store(&self) -> Option<&CheckpointStore> {
        self.store.as_ref()
    }

    pub fn forget_rate(&self, epoch: usize) -> f64 {
        self.schedule.rate(epoch).clamp(0.0, 1.0)
    }

    /// Run a hook on every callback. Callbacks are taken out for the call so
    /// they can observe the trainer.
    fn dispatch<F>(&mut self, mut f: F) -> CoTeachResult<()>
    where
        F: FnMut(&mut Box<dyn Callback>, &Trainer) -> CoTeachResult<()>,
    {
        let mut callbacks = std::mem::take(&mut self.callbacks);
        let this: &Trainer = self;
        let result = callbacks.iter_mut().try_for_each(|cb| f(cb, this));
        self.callbacks = callbacks;
        result
    }

    fn should_stop(&self) -> bool {
        self.callbacks.iter().any(|cb| cb.should_stop())
    }

    /// Train two peers against each other for `max_epochs`, validating both on
    /// `val` after every epoch.
    pub fn fit<M, O, D>(
        &mut self,
        unit_a: &mut TrainingUnit<M, O>,
        unit_b: &mut TrainingUnit<M, O>,
        train: &D,
        val: &D,
    ) -> CoTeachResult<Vec<EpochReport>>
    where
        M: Classifier,
        O: Optimizer,
        D: SegmentDataset + ?Sized,
    {
        self.config.validate()?;
        if train.is_empty() {
            return Err(CoTeachError::data("training set is empty"));
        }
        info!(
            train = train.len(),
            val = val.len(),
            epochs = self.config.max_epochs,
            batch_size = self.config.batch_size,
            "starting co-teaching"
        );

        self.dispatch(|cb, t| cb.on_fit_start(t))?;

        let mut reports = Vec::with_capacity(self.config.max_epochs);
        let mut batches = BatchIterator::new(train.len(), self.config.batch_size);
        for epoch in 0..self.config.max_epochs {
            self.dispatch(|cb, t| cb.on_epoch_start(t, epoch))?;

            let report = self.run_epoch(epoch, &mut batches, unit_a, unit_b, train, val)?;
            self.dispatch(|cb, t| cb.on_epoch_end(t, &report))?;
            reports.push(report);

            if self.should_stop() {
                info!(epoch, "stopping requested by callback");
                break;
            }
        }

        self.dispatch(|cb, t| cb.on_fit_end(t))?;
        let best = self.best();
        info!(
            best_f1 = best.f1,
            best_epoch = ?best.epoch,
            best_model = ?best.model,
            "co-teaching finished"
        );
        Ok(reports)
    }

    fn run_epoch<M, O, D>(
        &mut self,
        epoch: usize,
        batches: &mut BatchIterator,
        unit_a: &mut TrainingUnit<M, O>,
        unit_b: &mut TrainingUnit<M, O>,
        train: &D,
        val: &D,
    ) -> CoTeachResult<EpochReport>
    where
        M: Classifier,
        O: Optimizer,
        D: SegmentDataset + ?Sized,
    {
        let forget_rate = self.forget_rate(epoch);
        unit_a.set_training(true);
        unit_b.set_training(true);
        batches.reshuffle(self.config.shuffle_seed, epoch);

        let (mut mean_a, mut mean_b) = (LossMean::default(), LossMean::default());
        let mut batch_idx = 0;
        while let Some(batch) = batches.next_batch(train) {
            let batch = batch?;
            let losses = co_teaching_step(&batch, unit_a, unit_b, forget_rate)?;
            mean_a.push(losses.loss_a);
            mean_b.push(losses.loss_b);

            if self.config.log_every_n_steps > 0 && batch_idx % self.config.log_every_n_steps == 0 {
                debug!(
                    epoch,
                    batch = batch_idx,
                    kept = losses.kept,
                    loss_a = ?losses.loss_a,
                    loss_b = ?losses.loss_b,
                    "train step"
                );
            }
            self.dispatch(|cb, t| cb.on_train_batch_end(t, batch_idx, &losses))?;
            batch_idx += 1;
        }

        let train_loss = [mean_a.mean(), mean_b.mean()];
        for (unit, loss) in [(&mut *unit_a, train_loss[0]), (&mut *unit_b, train_loss[1])] {
            if loss.is_none() {
                warn!(epoch, model = unit.name(), "no update this epoch, scheduler not stepped");
            } else if let Some(lr) = unit.step_scheduler(loss) {
                warn!(epoch, model = unit.name(), lr, "reducing learning rate");
            }
        }

        unit_a.set_training(false);
        unit_b.set_training(false);
        let [metrics_a, metrics_b] = self.validate(unit_a, unit_b, val)?;

        let mut checkpoints = [None, None];
        if let Some(store) = &self.store {
            checkpoints[0] = Some(store.save_epoch(unit_a.model().varmap(), 1, epoch)?);
            checkpoints[1] = Some(store.save_epoch(unit_b.model().varmap(), 2, epoch)?);
        }
        let is_best_a =
            self.selector
                .update(epoch, 1, metrics_a.f1, train_loss[0], unit_a.model().varmap())?;
        let is_best_b =
            self.selector
                .update(epoch, 2, metrics_b.f1, train_loss[1], unit_b.model().varmap())?;

        let [ckpt_a, ckpt_b] = checkpoints;
        let report = EpochReport {
            epoch,
            forget_rate,
            models: [
                ModelReport {
                    name: unit_a.name().to_string(),
                    train_loss: train_loss[0],
                    metrics: metrics_a,
                    learning_rate: unit_a.learning_rate(),
                    checkpoint: ckpt_a,
                    is_best: is_best_a,
                },
                ModelReport {
                    name: unit_b.name().to_string(),
                    train_loss: train_loss[1],
                    metrics: metrics_b,
                    learning_rate: unit_b.learning_rate(),
                    checkpoint: ckpt_b,
                    is_best: is_best_b,
                },
            ],
            best: self.selector.best(),
        };

        for m in &report.models {
            info!(
                epoch,
                model = %m.name,
                forget_rate,
                train_loss = ?m.train_loss,
                precision = m.metrics.precision,
                recall = m.metrics.recall,
                f1 = m.metrics.f1,
                lr = m.learning_rate,
                best = m.is_best,
                "epoch end"
            );
        }
        Ok(report)
    }

    /// Validation metrics of both peers over the whole held-out set.
    fn validate<M, O, D>(
        &self,
        unit_a: &TrainingUnit<M, O>,
        unit_b: &TrainingUnit<M, O>,
        val: &D,
    ) -> CoTeachResult<[BinaryMetrics; 2]>
    where
        M: Classifier,
        O: Optimizer,
        D: SegmentDataset + ?Sized,
    {
        let threshold = self.config.decision_threshold;
        let (mut f1_a, mut f1_b) = (ThresholdF1::new(threshold), ThresholdF1::new(threshold));
        let mut batches = BatchIterator::new(val.len(), self.config.batch_size);
        while let Some(batch) = batches.next_batch(val) {
            let batch = batch?;
            f1_a.update(&unit_a.probabilities(&batch.features)?, &batch.labels)?;
            f1_b.update(&unit_b.probabilities(&batch.features)?, &batch.labels)?;
        }
        Ok([f1_a.confusion().metrics(), f1_b.confusion().metrics()])
    }
}
