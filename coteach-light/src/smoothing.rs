//! Temporal consistency correction for per-segment predictions.
//!
//! An apnea event spans several consecutive segments, so a single positive
//! segment with at least two quiet segments on each side is treated as a
//! spurious detection and cleared. The same pass is applied to label
//! sequences so both sides of the comparison follow one rule.

/// How a zero-run that reaches the start or end of the sequence is counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BoundaryPolicy {
    /// Only zeros inside the sequence count. A `1` at the first or last
    /// position is never cleared.
    #[default]
    InsufficientEvidence,
    /// A zero-run that runs into the edge satisfies that side regardless of
    /// its length.
    CountsAsQuiet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalSmoother {
    /// Zeros required on each side of an isolated `1`.
    pub min_quiet: usize,
    /// Scan advance after clearing a detection.
    pub skip_after_reset: usize,
    pub boundary: BoundaryPolicy,
}

impl Default for TemporalSmoother {
    fn default() -> Self {
        Self {
            min_quiet: 2,
            skip_after_reset: 3,
            boundary: BoundaryPolicy::default(),
        }
    }
}

impl TemporalSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boundary(mut self, boundary: BoundaryPolicy) -> Self {
        self.boundary = boundary;
        self
    }

    fn side_is_quiet(&self, zeros: usize, reaches_edge: bool) -> bool {
        zeros >= self.min_quiet
            || (reaches_edge && self.boundary == BoundaryPolicy::CountsAsQuiet)
    }

    /// Clear isolated detections in place. Returns how many were cleared.
    pub fn smooth_in_place(&self, seq: &mut [u8]) -> usize {
        let n = seq.len();
        if n < 2 {
            return 0;
        }
        let mut cleared = 0;
        let mut i = 0;
        while i < n {
            if seq[i] == 0 {
                i += 1;
                continue;
            }
            let before = seq[..i].iter().rev().take_while(|&&v| v == 0).count();
            let after = seq[i + 1..].iter().take_while(|&&v| v == 0).count();
            let quiet_before = self.side_is_quiet(before, before == i);
            let quiet_after = self.side_is_quiet(after, i + 1 + after == n);
            if quiet_before && quiet_after {
                seq[i] = 0;
                cleared += 1;
                i += self.skip_after_reset.max(1);
            } else {
                i += 1;
            }
        }
        cleared
    }

    pub fn smooth(&self, seq: &[u8]) -> Vec<u8> {
        let mut out = seq.to_vec();
        self.smooth_in_place(&mut out);
        out
    }
}
