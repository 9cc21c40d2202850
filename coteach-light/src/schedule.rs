//! Forget-rate schedules.

use std::f64::consts::PI;

/// Fraction of each batch to discard, as a pure function of the epoch.
pub trait ForgetRateSchedule: Send + Sync {
    /// Forget rate for `epoch` (0-indexed), always in `[0, 1]`.
    fn rate(&self, epoch: usize) -> f64;
}

/// Ramp from 0 to `max_forget_rate` over `gradual_epochs`, then hold.
///
/// `rate(e) = max * (e / gradual)^power` while `e < gradual`. `power` only bends
/// the curve: the ramp always starts at 0 and ends at `max_forget_rate`. With
/// the default power of 1 the ramp is linear.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearRamp {
    pub max_forget_rate: f64,
    pub gradual_epochs: usize,
    pub power: f64,
}

impl LinearRamp {
    pub fn new(max_forget_rate: f64, gradual_epochs: usize) -> Self {
        Self {
            max_forget_rate,
            gradual_epochs,
            power: 1.0,
        }
    }

    /// Above 1 the ramp starts slow, below 1 it starts fast.
    pub fn power(mut self, power: f64) -> Self {
        self.power = power;
        self
    }
}

impl ForgetRateSchedule for LinearRamp {
    fn rate(&self, epoch: usize) -> f64 {
        let max = self.max_forget_rate.clamp(0.0, 1.0);
        if epoch >= self.gradual_epochs {
            return max;
        }
        let progress = epoch as f64 / self.gradual_epochs as f64;
        (max * progress.powf(self.power)).clamp(0.0, max)
    }
}

/// Same forget rate every epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantRate(pub f64);

impl ForgetRateSchedule for ConstantRate {
    fn rate(&self, _epoch: usize) -> f64 {
        self.0.clamp(0.0, 1.0)
    }
}

/// Half-cosine ramp from 0 to `max_forget_rate` over `gradual_epochs`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CosineRamp {
    pub max_forget_rate: f64,
    pub gradual_epochs: usize,
}

impl ForgetRateSchedule for CosineRamp {
    fn rate(&self, epoch: usize) -> f64 {
        let max = self.max_forget_rate.clamp(0.0, 1.0);
        if epoch >= self.gradual_epochs {
            return max;
        }
        let progress = epoch as f64 / self.gradual_epochs as f64;
        (max * 0.5 * (1.0 - (PI * progress).cos())).clamp(0.0, max)
    }
}
