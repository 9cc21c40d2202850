//! Reduce-on-plateau learning-rate scheduler.

use crate::callbacks::Mode;

/// Scale the learning rate by `factor` once the monitored loss has not improved
/// for more than `patience` consecutive epochs.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    mode: Mode,
    factor: f64,
    patience: usize,
    threshold: f64,
    min_lr: f64,
    best_metric: Option<f64>,
    epochs_without_improvement: usize,
}

impl ReduceLrOnPlateau {
    pub fn new() -> Self {
        Self {
            mode: Mode::Min,
            factor: 0.1,
            patience: 5,
            threshold: 1e-4,
            min_lr: 0.0,
            best_metric: None,
            epochs_without_improvement: 0,
        }
    }

    pub fn factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    /// Relative improvement needed to count as better.
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn min_lr(mut self, min_lr: f64) -> Self {
        self.min_lr = min_lr;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn best_metric(&self) -> Option<f64> {
        self.best_metric
    }

    pub fn epochs_without_improvement(&self) -> usize {
        self.epochs_without_improvement
    }

    fn is_improvement(&self, current: f64, best: f64) -> bool {
        match self.mode {
            Mode::Min => current < best * (1.0 - self.threshold),
            Mode::Max => current > best * (1.0 + self.threshold),
        }
    }

    /// Record one epoch's metric. Returns the new learning rate when it was reduced.
    ///
    /// Non-finite metrics are ignored and leave the plateau counter untouched.
    pub fn step(&mut self, metric: f64, current_lr: f64) -> Option<f64> {
        if !metric.is_finite() {
            return None;
        }

        match self.best_metric {
            Some(best) if !self.is_improvement(metric, best) => {
                self.epochs_without_improvement += 1;
            }
            _ => {
                self.best_metric = Some(metric);
                self.epochs_without_improvement = 0;
            }
        }

        if self.epochs_without_improvement <= self.patience {
            return None;
        }
        self.epochs_without_improvement = 0;

        let new_lr = (current_lr * self.factor).max(self.min_lr);
        if current_lr - new_lr > 1e-8 {
            Some(new_lr)
        } else {
            None
        }
    }
}

impl Default for ReduceLrOnPlateau {
    fn default() -> Self {
        Self::new()
    }
}
