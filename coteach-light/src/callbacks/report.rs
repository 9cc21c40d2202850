//! Per-epoch metrics export.

use std::fs::OpenOptions;
use std::path::PathBuf;

use super::{Callback, EpochReport};
use crate::error::CoTeachResult;
use crate::Trainer;

const HEADER: [&str; 10] = [
    "epoch",
    "forget_rate",
    "precision_1",
    "recall_1",
    "f1_1",
    "precision_2",
    "recall_2",
    "f1_2",
    "train_loss_1",
    "train_loss_2",
];

/// Appends one CSV row per epoch. The header is written only when the file is
/// created, so successive runs accumulate in the same report.
pub struct MetricsReport {
    path: PathBuf,
}

impl MetricsReport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn writer(&self) -> CoTeachResult<csv::Writer<std::fs::File>> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(csv::WriterBuilder::new().has_headers(false).from_writer(file))
    }
}

fn loss_cell(loss: Option<f64>) -> String {
    loss.map(|v| format!("{v:.6}")).unwrap_or_default()
}

impl Callback for MetricsReport {
    fn on_fit_start(&mut self, _trainer: &Trainer) -> CoTeachResult<()> {
        if self.path.exists() {
            return Ok(());
        }
        let mut w = self.writer()?;
        w.write_record(HEADER)?;
        w.flush()?;
        Ok(())
    }

    fn on_epoch_end(&mut self, _trainer: &Trainer, report: &EpochReport) -> CoTeachResult<()> {
        let [m1, m2] = &report.models;
        let mut w = self.writer()?;
        w.write_record([
            report.epoch.to_string(),
            format!("{:.4}", report.forget_rate),
            format!("{:.6}", m1.metrics.precision),
            format!("{:.6}", m1.metrics.recall),
            format!("{:.6}", m1.metrics.f1),
            format!("{:.6}", m2.metrics.precision),
            format!("{:.6}", m2.metrics.recall),
            format!("{:.6}", m2.metrics.f1),
            loss_cell(m1.train_loss),
            loss_cell(m2.train_loss),
        ])?;
        w.flush()?;
        Ok(())
    }
}
