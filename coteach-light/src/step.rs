//! One co-teaching update of both peers on a single batch.
//!
//! The step is split in two phases so the protocol is enforced by the borrow
//! checker rather than by call order: [`rank`] only borrows the peers
//! immutably and captures both loss rankings; [`RankedBatch::update`] is the
//! only place parameters change, and it can only run on a finished ranking.

use candle_nn::Optimizer;

use crate::data::Batch;
use crate::error::CoTeachResult;
use crate::module::Classifier;
use crate::selection::SmallLossSelection;
use crate::unit::TrainingUnit;

/// Losses reported by one co-teaching step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepLosses {
    /// Mean loss of peer A on the samples chosen by B. `None` when A skipped
    /// its update (nothing was kept).
    pub loss_a: Option<f32>,
    /// Mean loss of peer B on the samples chosen by A.
    pub loss_b: Option<f32>,
    /// Samples each peer was trained on.
    pub kept: usize,
    pub batch_size: usize,
    pub forget_rate: f64,
}

/// A batch whose per-peer rankings are fixed. Consumed by [`RankedBatch::update`].
#[derive(Debug)]
pub struct RankedBatch<'a> {
    batch: &'a Batch,
    selection: SmallLossSelection,
    forget_rate: f64,
}

impl<'a> RankedBatch<'a> {
    pub fn selection(&self) -> &SmallLossSelection {
        &self.selection
    }

    pub fn forget_rate(&self) -> f64 {
        self.forget_rate
    }

    /// Update A on B's selection and B on A's selection.
    pub fn update<M, O>(
        self,
        unit_a: &mut TrainingUnit<M, O>,
        unit_b: &mut TrainingUnit<M, O>,
    ) -> CoTeachResult<StepLosses>
    where
        M: Classifier,
        O: Optimizer,
    {
        let loss_a = unit_a.update_on(self.batch, self.selection.for_update_of_a())?;
        let loss_b = unit_b.update_on(self.batch, self.selection.for_update_of_b())?;
        Ok(StepLosses {
            loss_a,
            loss_b,
            kept: self.selection.ranked_by_a.len(),
            batch_size: self.batch.len(),
            forget_rate: self.forget_rate,
        })
    }
}

/// Phase one: both peers score the full batch before anything is updated.
pub fn rank<'a, M, O>(
    batch: &'a Batch,
    unit_a: &TrainingUnit<M, O>,
    unit_b: &TrainingUnit<M, O>,
    forget_rate: f64,
) -> CoTeachResult<RankedBatch<'a>>
where
    M: Classifier,
    O: Optimizer,
{
    let forget_rate = forget_rate.clamp(0.0, 1.0);
    if batch.is_empty() {
        return Ok(RankedBatch {
            batch,
            selection: SmallLossSelection::default(),
            forget_rate,
        });
    }
    let loss_a = unit_a.sample_losses(batch)?;
    let loss_b = unit_b.sample_losses(batch)?;
    Ok(RankedBatch {
        batch,
        selection: SmallLossSelection::select(&loss_a, &loss_b, forget_rate),
        forget_rate,
    })
}

/// Rank, then update. The full co-teaching step on one batch.
pub fn co_teaching_step<M, O>(
    batch: &Batch,
    unit_a: &mut TrainingUnit<M, O>,
    unit_b: &mut TrainingUnit<M, O>,
    forget_rate: f64,
) -> CoTeachResult<StepLosses>
where
    M: Classifier,
    O: Optimizer,
{
    rank(batch, unit_a, unit_b, forget_rate)?.update(unit_a, unit_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainerConfig;
    use candle::{DType, Device, Result, Tensor};
    use candle_nn::{AdamW, Linear, Module, VarBuilder, VarMap};

    struct Logistic {
        head: Linear,
        varmap: VarMap,
    }

    impl Logistic {
        fn new() -> Self {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
            let head = candle_nn::linear(2, 1, vb.pp("head")).unwrap();
            Self { head, varmap }
        }
    }

    impl Classifier for Logistic {
        fn forward(&self, xs: &Tensor) -> Result<Tensor> {
            candle_nn::ops::sigmoid(&self.head.forward(xs)?)
        }
        fn set_training(&mut self, _training: bool) {}
        fn varmap(&self) -> &VarMap {
            &self.varmap
        }
    }

    fn unit(seed: u64) -> TrainingUnit<Logistic, AdamW> {
        let cfg = TrainerConfig::new().learning_rate(0.05);
        TrainingUnit::adam("peer", Logistic::new(), seed, &cfg).unwrap()
    }

    fn weights(unit: &TrainingUnit<Logistic, AdamW>) -> Vec<f32> {
        unit.model()
            .parameters()
            .iter()
            .flat_map(|v| v.flatten_all().unwrap().to_vec1::<f32>().unwrap())
            .collect()
    }

    fn batch() -> Batch {
        let device = Device::Cpu;
        let xs = Tensor::new(&[[1f32, 0.], [-1., 0.], [0.8, 0.2], [-0.9, 0.1]], &device).unwrap();
        let ys = Tensor::new(&[1f32, 0., 1., 0.], &device).unwrap();
        Batch::new(xs, ys)
    }

    #[test]
    fn test_step_updates_both_peers() {
        let (mut a, mut b) = (unit(128), unit(12));
        let (wa, wb) = (weights(&a), weights(&b));
        let losses = co_teaching_step(&batch(), &mut a, &mut b, 0.5).unwrap();

        assert_eq!(losses.kept, 2);
        assert_eq!(losses.batch_size, 4);
        assert!(losses.loss_a.is_some() && losses.loss_b.is_some());
        assert_ne!(weights(&a), wa);
        assert_ne!(weights(&b), wb);
    }

    #[test]
    fn test_rankings_are_captured_before_updates() {
        let (mut a, mut b) = (unit(128), unit(12));
        let b_batch = batch();
        let expected_b = b.sample_losses(&b_batch).unwrap();
        let ranked = rank(&b_batch, &a, &b, 0.25).unwrap();
        let expected = SmallLossSelection::select(
            &a.sample_losses(&b_batch).unwrap(),
            &expected_b,
            0.25,
        );
        assert_eq!(ranked.selection(), &expected);
        ranked.update(&mut a, &mut b).unwrap();
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let (mut a, mut b) = (unit(1), unit(2));
        let (wa, wb) = (weights(&a), weights(&b));
        let device = Device::Cpu;
        let empty = Batch::new(
            Tensor::zeros((0, 2), DType::F32, &device).unwrap(),
            Tensor::zeros(0, DType::F32, &device).unwrap(),
        );
        let losses = co_teaching_step(&empty, &mut a, &mut b, 0.3).unwrap();

        assert_eq!(losses.loss_a, None);
        assert_eq!(losses.loss_b, None);
        assert_eq!(losses.batch_size, 0);
        assert_eq!(weights(&a), wa);
        assert_eq!(weights(&b), wb);
    }

    #[test]
    fn test_full_forget_skips_backprop() {
        let (mut a, mut b) = (unit(1), unit(2));
        let (wa, wb) = (weights(&a), weights(&b));
        let losses = co_teaching_step(&batch(), &mut a, &mut b, 1.0).unwrap();

        assert_eq!(losses.kept, 0);
        assert_eq!(losses.loss_a, None);
        assert_eq!(losses.loss_b, None);
        assert_eq!(weights(&a), wa);
        assert_eq!(weights(&b), wb);
    }
}
