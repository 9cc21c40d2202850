//! Binary cross-entropy over probability outputs.

use candle::{DType, Result, Tensor};

/// Probabilities are clamped away from 0 and 1 before taking logs.
pub const PROB_EPS: f64 = 1e-7;

/// Per-sample binary cross-entropy, no reduction.
///
/// `probs` and `targets` may be `[N]` or `[N, 1]`; the result is always `[N]`.
pub fn binary_cross_entropy(probs: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let probs = probs.flatten_all()?.to_dtype(DType::F32)?;
    let probs = probs.clamp(PROB_EPS, 1.0 - PROB_EPS)?;
    let targets = targets.flatten_all()?.to_dtype(DType::F32)?;

    // -(t * ln p + (1 - t) * ln(1 - p))
    let pos = targets.mul(&probs.log()?)?;
    let neg = targets
        .affine(-1.0, 1.0)?
        .mul(&probs.affine(-1.0, 1.0)?.log()?)?;
    pos.add(&neg)?.neg()
}

/// Batch-mean binary cross-entropy, the quantity that is back-propagated.
pub fn binary_cross_entropy_mean(probs: &Tensor, targets: &Tensor) -> Result<Tensor> {
    binary_cross_entropy(probs, targets)?.mean_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle::Device;

    #[test]
    fn test_per_sample_values() {
        let device = Device::Cpu;
        let probs = Tensor::new(&[[0.9f32], [0.1], [0.5]], &device).unwrap();
        let targets = Tensor::new(&[1f32, 1., 0.], &device).unwrap();
        let loss: Vec<f32> = binary_cross_entropy(&probs, &targets)
            .unwrap()
            .to_vec1()
            .unwrap();

        assert_eq!(loss.len(), 3);
        assert!((loss[0] - 0.9f32.ln().abs()).abs() < 1e-5);
        assert!((loss[1] - 0.1f32.ln().abs()).abs() < 1e-5);
        assert!((loss[2] - 0.5f32.ln().abs()).abs() < 1e-5);
    }

    #[test]
    fn test_saturated_probabilities_stay_finite() {
        let device = Device::Cpu;
        let probs = Tensor::new(&[0f32, 1.], &device).unwrap();
        let targets = Tensor::new(&[1f32, 0.], &device).unwrap();
        let loss: Vec<f32> = binary_cross_entropy(&probs, &targets)
            .unwrap()
            .to_vec1()
            .unwrap();
        assert!(loss.iter().all(|l| l.is_finite() && *l > 10.0));
    }

    #[test]
    fn test_mean_reduction() {
        let device = Device::Cpu;
        let probs = Tensor::new(&[0.5f32, 0.5], &device).unwrap();
        let targets = Tensor::new(&[1f32, 0.], &device).unwrap();
        let mean: f32 = binary_cross_entropy_mean(&probs, &targets)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!((mean - std::f32::consts::LN_2).abs() < 1e-5);
    }
}
