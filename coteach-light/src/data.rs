//! Segment datasets, class balancing and shuffled batch iteration.

use std::collections::HashMap;
use std::path::Path;

use candle::{DType, Device, Tensor};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{CoTeachError, CoTeachResult};

/// Index-aligned features and binary labels of one mini-batch.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[N, ...]` spectrogram features.
    pub features: Tensor,
    /// `[N]` labels, 0.0 = no event, 1.0 = apnea.
    pub labels: Tensor,
}

impl Batch {
    pub fn new(features: Tensor, labels: Tensor) -> Self {
        Self { features, labels }
    }

    pub fn len(&self) -> usize {
        self.labels.dims().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows of this batch at `indices`, in that order.
    pub fn select(&self, indices: &[u32]) -> CoTeachResult<Batch> {
        let idx = Tensor::from_slice(indices, indices.len(), self.features.device())?;
        Ok(Batch {
            features: self.features.index_select(&idx, 0)?,
            labels: self.labels.index_select(&idx, 0)?,
        })
    }
}

/// Indexable collection of `(features, label)` segments with a known length.
pub trait SegmentDataset {
    fn len(&self) -> usize;

    /// Feature tensor and label of one segment.
    fn get(&self, index: usize) -> CoTeachResult<(Tensor, f32)>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Assemble the segments at `indices` into a batch.
    fn batch(&self, indices: &[usize]) -> CoTeachResult<Batch> {
        if indices.is_empty() {
            return Err(CoTeachError::data("cannot assemble an empty batch"));
        }
        let mut features = Vec::with_capacity(indices.len());
        let mut labels = Vec::with_capacity(indices.len());
        for &i in indices {
            let (x, y) = self.get(i)?;
            features.push(x);
            labels.push(y);
        }
        let device = features[0].device().clone();
        Ok(Batch {
            features: Tensor::stack(&features, 0)?,
            labels: Tensor::from_vec(labels, indices.len(), &device)?,
        })
    }
}

/// Segments held in a single feature tensor.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    features: Tensor,
    labels: Vec<f32>,
}

impl InMemoryDataset {
    pub fn new(features: Tensor, labels: Vec<f32>) -> CoTeachResult<Self> {
        let n = features.dim(0)?;
        if n != labels.len() {
            return Err(CoTeachError::data(format!(
                "{} feature rows but {} labels",
                n,
                labels.len()
            )));
        }
        Ok(Self { features, labels })
    }

    /// Load `features` (`[N, ...]`) and `labels` (`[N]`) from a safetensors file.
    pub fn load(path: impl AsRef<Path>, device: &Device) -> CoTeachResult<Self> {
        let path = path.as_ref();
        let mut tensors: HashMap<String, Tensor> = candle::safetensors::load(path, device)
            .map_err(|e| CoTeachError::data(format!("failed to read {}: {e}", path.display())))?;
        let features = tensors.remove("features").ok_or_else(|| {
            CoTeachError::data(format!("tensor 'features' not found in {}", path.display()))
        })?;
        let labels = tensors.remove("labels").ok_or_else(|| {
            CoTeachError::data(format!("tensor 'labels' not found in {}", path.display()))
        })?;
        let labels: Vec<f32> = labels.flatten_all()?.to_dtype(DType::F32)?.to_vec1()?;
        Self::new(features.to_dtype(DType::F32)?, labels)
    }

    pub fn features(&self) -> &Tensor {
        &self.features
    }

    pub fn labels(&self) -> &[f32] {
        &self.labels
    }

    /// A new dataset holding the rows at `indices` (repeats allowed).
    pub fn subset(&self, indices: &[usize]) -> CoTeachResult<Self> {
        let batch = self.batch(indices)?;
        Ok(Self {
            features: batch.features,
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        })
    }
}

impl SegmentDataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn get(&self, index: usize) -> CoTeachResult<(Tensor, f32)> {
        let label = *self.labels.get(index).ok_or_else(|| {
            CoTeachError::data(format!("index {index} out of range for {} segments", self.labels.len()))
        })?;
        Ok((self.features.get(index)?, label))
    }

    fn batch(&self, indices: &[usize]) -> CoTeachResult<Batch> {
        if indices.is_empty() {
            return Err(CoTeachError::data("cannot assemble an empty batch"));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.labels.len()) {
            return Err(CoTeachError::data(format!(
                "index {bad} out of range for {} segments",
                self.labels.len()
            )));
        }
        let device = self.features.device();
        let rows: Vec<u32> = indices.iter().map(|&i| i as u32).collect();
        let idx = Tensor::from_vec(rows, indices.len(), device)?;
        let labels: Vec<f32> = indices.iter().map(|&i| self.labels[i]).collect();
        Ok(Batch {
            features: self.features.index_select(&idx, 0)?,
            labels: Tensor::from_vec(labels, indices.len(), device)?,
        })
    }
}

/// Resample the minority class with replacement up to the majority count.
///
/// Classes are pooled over the whole set, not per recording. Returns dataset
/// indices: every original index once, plus the drawn repeats.
pub fn oversample_minority(labels: &[f32], seed: u64) -> Vec<usize> {
    let (positive, negative): (Vec<usize>, Vec<usize>) =
        (0..labels.len()).partition(|&i| labels[i] >= 0.5);
    let (minority, majority) = if positive.len() < negative.len() {
        (positive, negative)
    } else {
        (negative, positive)
    };

    let mut indices: Vec<usize> = (0..labels.len()).collect();
    if minority.is_empty() {
        return indices;
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let extra = majority.len() - minority.len();
    indices.extend((0..extra).map(|_| minority[rng.random_range(0..minority.len())]));
    indices
}

/// Mini-batch index iterator. Reshuffles indices each epoch.
pub struct BatchIterator {
    indices: Vec<usize>,
    batch_size: usize,
    pos: usize,
}

impl BatchIterator {
    pub fn new(len: usize, batch_size: usize) -> Self {
        Self {
            indices: (0..len).collect(),
            batch_size: batch_size.max(1),
            pos: 0,
        }
    }

    /// Reshuffle for a new epoch using a seeded RNG derived from base seed + epoch.
    pub fn reshuffle(&mut self, seed: u64, epoch: usize) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch as u64));
        self.indices.shuffle(&mut rng);
        self.pos = 0;
    }

    pub fn num_batches(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }

    /// Indices of the next mini-batch, or None if the epoch is exhausted.
    /// The last batch may be shorter than `batch_size`.
    pub fn next_indices(&mut self) -> Option<&[usize]> {
        let n = self.indices.len();
        if self.pos >= n {
            return None;
        }
        let start = self.pos;
        let end = (start + self.batch_size).min(n);
        self.pos = end;
        Some(&self.indices[start..end])
    }

    /// Next assembled mini-batch from `dataset`.
    pub fn next_batch<D: SegmentDataset + ?Sized>(
        &mut self,
        dataset: &D,
    ) -> Option<CoTeachResult<Batch>> {
        let indices = self.next_indices()?;
        Some(dataset.batch(indices))
    }
}
