//! Evaluation of a trained classifier over whole recordings.

use std::collections::BTreeMap;

use candle::{DType, Tensor};
use serde::Serialize;
use tracing::debug;

use crate::error::{CoTeachError, CoTeachResult};
use crate::metrics::{binarize, BinaryMetrics, ConfusionMatrix};
use crate::module::Classifier;
use crate::smoothing::TemporalSmoother;

/// Binary predictions for every segment of `segments`, in order.
///
/// `segments` is `[num_segments, ...]`; it is fed through the model in chunks
/// of `batch_size`.
pub fn predict_sequence<M: Classifier + ?Sized>(
    model: &M,
    segments: &Tensor,
    threshold: f64,
    batch_size: usize,
) -> CoTeachResult<Vec<u8>> {
    let n = segments.dim(0)?;
    let batch_size = batch_size.max(1);
    let mut probs = Vec::with_capacity(n);
    let mut start = 0;
    while start < n {
        let len = batch_size.min(n - start);
        let chunk = segments.narrow(0, start, len)?;
        let out = model.forward(&chunk)?.detach();
        probs.extend(out.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()?);
        start += len;
    }
    Ok(binarize(&probs, threshold))
}

/// Time-ordered predictions and labels of one recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    pub name: String,
    pub predictions: Vec<u8>,
    pub labels: Vec<u8>,
}

impl Recording {
    pub fn new(name: impl Into<String>, predictions: Vec<u8>, labels: Vec<u8>) -> CoTeachResult<Self> {
        let name = name.into();
        if predictions.len() != labels.len() {
            return Err(CoTeachError::data(format!(
                "recording {name}: {} predictions for {} labels",
                predictions.len(),
                labels.len()
            )));
        }
        Ok(Self {
            name,
            predictions,
            labels,
        })
    }

    /// Smooth predictions and labels independently with the same rule.
    pub fn smoothed(&self, smoother: &TemporalSmoother) -> Self {
        Self {
            name: self.name.clone(),
            predictions: smoother.smooth(&self.predictions),
            labels: smoother.smooth(&self.labels),
        }
    }

    pub fn confusion(&self) -> CoTeachResult<ConfusionMatrix> {
        ConfusionMatrix::from_binary(&self.predictions, &self.labels)
            .map_err(|e| match e {
                CoTeachError::Data(msg) => CoTeachError::data(format!("recording {}: {msg}", self.name)),
                other => other,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    pub raw: BinaryMetrics,
    pub smoothed: BinaryMetrics,
}

/// Score recordings before and after temporal smoothing. Each recording is
/// smoothed on its own so no run crosses a recording boundary.
pub fn evaluate_recordings(
    recordings: &[Recording],
    smoother: &TemporalSmoother,
) -> CoTeachResult<Evaluation> {
    let mut raw = ConfusionMatrix::default();
    let mut smoothed = ConfusionMatrix::default();
    for rec in recordings {
        raw.merge(&rec.confusion()?);
        let corrected = rec.smoothed(smoother);
        smoothed.merge(&corrected.confusion()?);
        debug!(
            recording = %rec.name,
            segments = rec.predictions.len(),
            "evaluated recording"
        );
    }
    Ok(Evaluation {
        raw: raw.metrics(),
        smoothed: smoothed.metrics(),
    })
}

/// One forward call per named segment, returning name -> 0/1.
pub fn infer_named<M: Classifier + ?Sized>(
    model: &M,
    items: &[(String, Tensor)],
    threshold: f64,
) -> CoTeachResult<BTreeMap<String, u8>> {
    let mut out = BTreeMap::new();
    for (name, segment) in items {
        let prob = model
            .forward(&segment.unsqueeze(0)?)?
            .flatten_all()?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()?;
        let p = prob.first().copied().ok_or_else(|| {
            CoTeachError::data(format!("model produced no output for {name}"))
        })?;
        out.insert(name.clone(), u8::from(p as f64 >= threshold));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smoothing::BoundaryPolicy;
    use candle::{Device, Result};
    use candle_nn::VarMap;

    /// Outputs the first feature as the probability.
    struct Passthrough(VarMap);

    impl Classifier for Passthrough {
        fn forward(&self, xs: &Tensor) -> Result<Tensor> {
            xs.narrow(1, 0, 1)?.squeeze(1)
        }
        fn set_training(&mut self, _training: bool) {}
        fn varmap(&self) -> &VarMap {
            &self.0
        }
    }

    #[test]
    fn test_predict_sequence_chunks_in_order() {
        let xs = Tensor::new(&[[0.9f32, 0.], [0.1, 0.], [0.6, 0.], [0.4, 0.], [0.5, 0.]], &Device::Cpu)
            .unwrap();
        let preds = predict_sequence(&Passthrough(VarMap::new()), &xs, 0.5, 2).unwrap();
        assert_eq!(preds, vec![1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_smoothing_changes_scores() {
        let rec = Recording::new(
            "r1",
            vec![0, 0, 1, 0, 0, 1, 1, 1, 0, 0],
            vec![0, 0, 0, 0, 0, 1, 1, 1, 0, 0],
        )
        .unwrap();
        let eval = evaluate_recordings(&[rec], &TemporalSmoother::new()).unwrap();
        assert_eq!(eval.raw.fp, 1);
        assert_eq!(eval.smoothed.fp, 0);
        assert_eq!(eval.smoothed.tp, 3);
        assert!(eval.smoothed.f1 > eval.raw.f1);
    }

    #[test]
    fn test_recordings_are_smoothed_separately() {
        // Joined, the trailing 1 of `a` would sit in the middle of a quiet run.
        let a = Recording::new("a", vec![0, 0, 0, 1], vec![0, 0, 0, 1]).unwrap();
        let b = Recording::new("b", vec![0, 0, 0], vec![0, 0, 0]).unwrap();
        let eval = evaluate_recordings(&[a, b], &TemporalSmoother::new()).unwrap();
        assert_eq!(eval.smoothed.tp, 1);

        let quiet = TemporalSmoother::new().boundary(BoundaryPolicy::CountsAsQuiet);
        let a = Recording::new("a", vec![0, 0, 0, 1], vec![0, 0, 0, 1]).unwrap();
        assert_eq!(evaluate_recordings(&[a], &quiet).unwrap().smoothed.tp, 0);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        assert!(Recording::new("bad", vec![0, 1], vec![0]).is_err());

        // Fields are public, so a mismatch can still reach evaluation.
        let good = Recording::new("good", vec![0, 1], vec![0, 1]).unwrap();
        let bad = Recording {
            name: "bad".to_string(),
            predictions: vec![0, 1, 1],
            labels: vec![0, 1],
        };
        assert!(bad.confusion().is_err());
        let err = evaluate_recordings(&[good, bad], &TemporalSmoother::new()).unwrap_err();
        assert!(err.to_string().contains("recording bad"));
    }

    #[test]
    fn test_infer_named() {
        let device = Device::Cpu;
        let items = vec![
            ("quiet".to_string(), Tensor::new(&[0.2f32, 1.0], &device).unwrap()),
            ("event".to_string(), Tensor::new(&[0.8f32, 0.0], &device).unwrap()),
        ];
        let out = infer_named(&Passthrough(VarMap::new()), &items, 0.5).unwrap();
        assert_eq!(out["quiet"], 0);
        assert_eq!(out["event"], 1);
    }
}
