//! Metrics for tracking training progress.

use candle::{DType, Result, Tensor};
use serde::Serialize;

use crate::error::{CoTeachError, CoTeachResult};

pub trait Metric {
    fn update(&mut self, preds: &Tensor, targets: &Tensor) -> Result<()>;
    fn compute(&self) -> f64;
    fn reset(&mut self);
}

/// Binary confusion counts. Class 1 = apnea.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    pub fn_count: usize,
}

impl ConfusionMatrix {
    /// Count a pair of equally long 0/1 sequences.
    pub fn from_binary(predictions: &[u8], labels: &[u8]) -> CoTeachResult<Self> {
        if predictions.len() != labels.len() {
            return Err(CoTeachError::data(format!(
                "{} predictions for {} labels",
                predictions.len(),
                labels.len()
            )));
        }
        let mut cm = Self::default();
        for (&pred, &label) in predictions.iter().zip(labels.iter()) {
            cm.add(pred != 0, label != 0);
        }
        Ok(cm)
    }

    pub fn add(&mut self, predicted: bool, actual: bool) {
        match (predicted, actual) {
            (true, true) => self.tp += 1,
            (true, false) => self.fp += 1,
            (false, false) => self.tn += 1,
            (false, true) => self.fn_count += 1,
        }
    }

    pub fn merge(&mut self, other: &ConfusionMatrix) {
        self.tp += other.tp;
        self.fp += other.fp;
        self.tn += other.tn;
        self.fn_count += other.fn_count;
    }

    pub fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_count
    }

    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_count)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r > 0.0 {
            2.0 * p * r / (p + r)
        } else {
            0.0
        }
    }

    pub fn metrics(&self) -> BinaryMetrics {
        BinaryMetrics {
            precision: self.precision(),
            recall: self.recall(),
            f1: self.f1(),
            accuracy: ratio(self.tp + self.tn, self.total()),
            tp: self.tp,
            fp: self.fp,
            tn: self.tn,
            fn_count: self.fn_count,
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den > 0 {
        num as f64 / den as f64
    } else {
        0.0
    }
}

/// Precision, recall and F1 with the counts they came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BinaryMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    pub fn_count: usize,
}

impl std::fmt::Display for BinaryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "prec={:.4} rec={:.4} f1={:.4} acc={:.4} (tp={} fp={} tn={} fn={})",
            self.precision,
            self.recall,
            self.f1,
            self.accuracy,
            self.tp,
            self.fp,
            self.tn,
            self.fn_count,
        )
    }
}

/// Threshold probabilities into 0/1 predictions.
pub fn binarize(probs: &[f32], threshold: f64) -> Vec<u8> {
    probs
        .iter()
        .map(|&p| u8::from(p as f64 >= threshold))
        .collect()
}

/// F1 over thresholded probabilities, accumulated across updates.
#[derive(Debug, Clone)]
pub struct ThresholdF1 {
    threshold: f64,
    confusion: ConfusionMatrix,
}

impl ThresholdF1 {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            confusion: ConfusionMatrix::default(),
        }
    }

    pub fn confusion(&self) -> &ConfusionMatrix {
        &self.confusion
    }
}

impl Metric for ThresholdF1 {
    fn update(&mut self, preds: &Tensor, targets: &Tensor) -> Result<()> {
        let probs: Vec<f32> = preds.flatten_all()?.to_dtype(DType::F32)?.to_vec1()?;
        let labels: Vec<f32> = targets.flatten_all()?.to_dtype(DType::F32)?.to_vec1()?;
        if probs.len() != labels.len() {
            candle::bail!(
                "predictions ({}) and targets ({}) differ in length",
                probs.len(),
                labels.len()
            );
        }
        for (&p, &t) in probs.iter().zip(labels.iter()) {
            self.confusion.add(p as f64 >= self.threshold, t >= 0.5);
        }
        Ok(())
    }

    fn compute(&self) -> f64 {
        self.confusion.f1()
    }

    fn reset(&mut self) {
        self.confusion = ConfusionMatrix::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle::Device;

    #[test]
    fn test_perfect_predictions() {
        let m = ConfusionMatrix::from_binary(&[0, 0, 1, 1], &[0, 0, 1, 1])
            .unwrap()
            .metrics();
        assert!((m.precision - 1.0).abs() < 1e-9);
        assert!((m.recall - 1.0).abs() < 1e-9);
        assert!((m.f1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_mixed() {
        // 3 TP, 1 FP, 2 TN, 1 FN
        let m = ConfusionMatrix::from_binary(&[1, 1, 1, 1, 0, 0, 0], &[1, 1, 1, 0, 0, 0, 1])
            .unwrap()
            .metrics();
        assert_eq!((m.tp, m.fp, m.tn, m.fn_count), (3, 1, 2, 1));
        assert!((m.precision - 0.75).abs() < 1e-9);
        assert!((m.recall - 0.75).abs() < 1e-9);
        assert!((m.f1 - 0.75).abs() < 1e-9);
        assert!((m.accuracy - 5.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_positive_predictions() {
        let m = ConfusionMatrix::from_binary(&[0, 0], &[1, 0]).unwrap().metrics();
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.f1, 0.0);
    }

    #[test]
    fn test_empty() {
        let m = ConfusionMatrix::from_binary(&[], &[]).unwrap().metrics();
        assert_eq!(m.f1, 0.0);
        assert_eq!(m.accuracy, 0.0);
    }

    #[test]
    fn test_from_binary_length_mismatch_is_an_error() {
        let err = ConfusionMatrix::from_binary(&[1, 0, 1], &[1, 0]).unwrap_err();
        assert!(matches!(err, CoTeachError::Data(_)));
        assert!(ConfusionMatrix::from_binary(&[], &[0]).is_err());
    }

    #[test]
    fn test_threshold_f1_accumulates_and_resets() {
        let device = Device::Cpu;
        let mut metric = ThresholdF1::new(0.5);
        let preds = Tensor::new(&[[0.9f32], [0.2]], &device).unwrap();
        let targets = Tensor::new(&[1f32, 1.], &device).unwrap();
        metric.update(&preds, &targets).unwrap();
        let preds = Tensor::new(&[0.5f32, 0.1], &device).unwrap();
        let targets = Tensor::new(&[1f32, 0.], &device).unwrap();
        metric.update(&preds, &targets).unwrap();

        assert_eq!(metric.confusion().tp, 2);
        assert_eq!(metric.confusion().fn_count, 1);
        assert!((metric.compute() - 0.8).abs() < 1e-9);

        metric.reset();
        assert_eq!(metric.compute(), 0.0);
    }

    #[test]
    fn test_binarize_threshold_inclusive() {
        assert_eq!(binarize(&[0.49, 0.5, 0.51], 0.5), vec![0, 1, 1]);
    }
}
