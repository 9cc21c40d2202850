//! Small-loss sample selection.
//!
//! Early in training, correctly labelled segments tend to have lower loss than
//! mislabelled ones. Each peer ranks the batch by its own per-sample loss and
//! keeps the smallest `floor((1 - forget_rate) * N)`; that ranking is then used
//! to train the *other* peer.

/// Number of samples kept out of `batch_len` for the given forget rate.
///
/// The rate is clamped to `[0, 1]`, so the result never exceeds `batch_len`.
pub fn num_keep(batch_len: usize, forget_rate: f64) -> usize {
    let remember_rate = 1.0 - forget_rate.clamp(0.0, 1.0);
    ((remember_rate * batch_len as f64).floor() as usize).min(batch_len)
}

/// Indices of the `num_keep` smallest losses, in ascending loss order.
///
/// The sort is stable, so equal losses keep their batch order.
pub fn small_loss_indices(losses: &[f32], forget_rate: f64) -> Vec<u32> {
    let keep = num_keep(losses.len(), forget_rate);
    let mut order: Vec<usize> = (0..losses.len()).collect();
    order.sort_by(|&i, &j| losses[i].total_cmp(&losses[j]));
    order.into_iter().take(keep).map(|i| i as u32).collect()
}

/// Kept-index sets of one batch, as ranked by each peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmallLossSelection {
    /// Samples peer A considers clean. Used to update peer B.
    pub ranked_by_a: Vec<u32>,
    /// Samples peer B considers clean. Used to update peer A.
    pub ranked_by_b: Vec<u32>,
}

impl SmallLossSelection {
    /// Rank both loss vectors independently.
    pub fn select(loss_a: &[f32], loss_b: &[f32], forget_rate: f64) -> Self {
        debug_assert_eq!(loss_a.len(), loss_b.len(), "loss vectors must be index-aligned");
        Self {
            ranked_by_a: small_loss_indices(loss_a, forget_rate),
            ranked_by_b: small_loss_indices(loss_b, forget_rate),
        }
    }

    /// Indices peer A is trained on: its peer's choice.
    pub fn for_update_of_a(&self) -> &[u32] {
        &self.ranked_by_b
    }

    /// Indices peer B is trained on: its peer's choice.
    pub fn for_update_of_b(&self) -> &[u32] {
        &self.ranked_by_a
    }

    pub fn is_empty(&self) -> bool {
        self.ranked_by_a.is_empty() && self.ranked_by_b.is_empty()
    }
}
