//! Co-teaching of two peer classifiers on Candle.
//!
//! Two models train side by side. On every batch each one ranks the samples by
//! its own loss, and each is then updated only on the small-loss samples chosen
//! by its peer. A temporal smoother cleans per-segment predictions at
//! evaluation time.

pub mod callbacks;
pub mod config;
pub mod data;
pub mod error;
pub mod evaluate;
pub mod loss;
pub mod metrics;
pub mod module;
pub mod schedule;
pub mod scheduler;
pub mod selection;
pub mod smoothing;
pub mod step;
pub mod trainer;
pub mod unit;

pub use callbacks::{
    load_checkpoint, BestScore, Callback, CheckpointSelector, CheckpointStore, EpochReport,
    MetricsReport, ModelReport,
};
pub use config::TrainerConfig;
pub use data::{Batch, BatchIterator, InMemoryDataset, SegmentDataset};
pub use error::{CoTeachError, CoTeachResult};
pub use evaluate::{evaluate_recordings, infer_named, predict_sequence, Evaluation, Recording};
pub use metrics::{BinaryMetrics, ConfusionMatrix};
pub use module::{reseed, Classifier};
pub use schedule::{ConstantRate, CosineRamp, ForgetRateSchedule, LinearRamp};
pub use scheduler::ReduceLrOnPlateau;
pub use selection::SmallLossSelection;
pub use smoothing::{BoundaryPolicy, TemporalSmoother};
pub use step::{co_teaching_step, rank, RankedBatch, StepLosses};
pub use trainer::Trainer;
pub use unit::TrainingUnit;

pub use candle_nn::Optimizer;
