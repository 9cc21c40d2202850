//! Classifier trait for the two co-taught peers.

use candle::{Result, Tensor, Var};
use candle_nn::VarMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// A binary classifier trainable by [`Trainer`](crate::Trainer).
///
/// The core never looks inside the architecture: it only needs per-sample
/// probabilities, a train/eval switch and the variables to optimise and persist.
pub trait Classifier {
    /// Apnea probabilities in `[0, 1]`, shaped `[N]` or `[N, 1]`.
    fn forward(&self, xs: &Tensor) -> Result<Tensor>;

    /// Switch between training behaviour (dropout, ...) and inference.
    fn set_training(&mut self, training: bool);

    /// Variables backing this model. Checkpoints save and load this map.
    fn varmap(&self) -> &VarMap;

    /// Return all trainable parameters.
    fn parameters(&self) -> Vec<Var> {
        self.varmap().all_vars()
    }
}

/// Re-initialise every variable of `varmap` from a seeded stream.
///
/// Values are uniform in `±1/sqrt(fan_in)`. Variables are visited in name order
/// so the same seed always produces the same model.
pub fn reseed(varmap: &VarMap, seed: u64) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| candle::Error::Msg("variable map lock poisoned".to_string()))?;
    let mut names: Vec<&String> = data.keys().collect();
    names.sort();

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for name in names {
        let var = &data[name];
        let dims = var.dims().to_vec();
        let fan_in = match dims.len() {
            0 => 1,
            1 => dims[0],
            _ => dims[1..].iter().product(),
        }
        .max(1);
        let bound = 1.0 / (fan_in as f32).sqrt();
        let values: Vec<f32> = (0..var.elem_count())
            .map(|_| rng.random_range(-bound..bound))
            .collect();
        let init = Tensor::from_vec(values, dims.as_slice(), var.device())?.to_dtype(var.dtype())?;
        var.set(&init)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle::{DType, Device};
    use candle_nn::VarBuilder;

    fn linear_varmap() -> VarMap {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        candle_nn::linear(4, 1, vb.pp("head")).unwrap();
        varmap
    }

    fn weights(varmap: &VarMap) -> Vec<f32> {
        let data = varmap.data().lock().unwrap();
        data["head.weight"].flatten_all().unwrap().to_vec1().unwrap()
    }

    #[test]
    fn test_same_seed_same_weights() {
        let a = linear_varmap();
        let b = linear_varmap();
        reseed(&a, 128).unwrap();
        reseed(&b, 128).unwrap();
        assert_eq!(weights(&a), weights(&b));
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = linear_varmap();
        let b = linear_varmap();
        reseed(&a, 128).unwrap();
        reseed(&b, 12).unwrap();
        assert_ne!(weights(&a), weights(&b));
    }

    #[test]
    fn test_values_within_fan_in_bound() {
        let a = linear_varmap();
        reseed(&a, 7).unwrap();
        assert!(weights(&a).iter().all(|w| w.abs() <= 0.5));
    }
}
