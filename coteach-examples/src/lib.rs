//! Spectrogram classifier used by the apnea examples.

use candle::{DType, Device, ModuleT, Result, Tensor};
use candle_nn::rnn::{gru, GRUConfig, GRU, RNN};
use candle_nn::{Conv2d, Conv2dConfig, Dropout, Linear, VarBuilder, VarMap};
use coteach_light::Classifier;

/// Convolution + ReLU + max-pool over (frequency, time).
struct ConvBlock {
    conv: Conv2d,
    pool: (usize, usize),
}

impl ConvBlock {
    fn new(in_c: usize, out_c: usize, kernel: usize, pool: (usize, usize), vb: VarBuilder) -> Result<Self> {
        let cfg = Conv2dConfig {
            padding: kernel / 2,
            ..Default::default()
        };
        let conv = candle_nn::conv2d_no_bias(in_c, out_c, kernel, cfg, vb)?;
        Ok(Self { conv, pool })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        xs.apply(&self.conv)?.relu()?.max_pool2d(self.pool)
    }
}

/// Convolutional front end, bidirectional GRU over time, sigmoid head.
///
/// Input is `[batch, 1, freq_bins, time]`; `freq_bins` must be a multiple of 64
/// and `time` at least 16.
pub struct SpectrogramNet {
    blocks: Vec<ConvBlock>,
    forward_rnn: GRU,
    backward_rnn: GRU,
    dropout: Dropout,
    head: Linear,
    varmap: VarMap,
    training: bool,
}

const HIDDEN: usize = 64;

impl SpectrogramNet {
    pub fn new(freq_bins: usize, dev: &Device) -> Result<Self> {
        if freq_bins == 0 || freq_bins % 64 != 0 {
            candle::bail!("freq_bins must be a positive multiple of 64, got {freq_bins}")
        }
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, dev);
        let blocks = vec![
            ConvBlock::new(1, 96, 5, (4, 2), vs.pp("c1"))?,
            ConvBlock::new(96, 128, 5, (4, 2), vs.pp("c2"))?,
            ConvBlock::new(128, 128, 5, (2, 2), vs.pp("c3"))?,
            ConvBlock::new(128, 128, 3, (2, 2), vs.pp("c4"))?,
        ];
        let rnn_in = 128 * (freq_bins / 64);
        let forward_rnn = gru(rnn_in, HIDDEN, GRUConfig::default(), vs.pp("gru_fwd"))?;
        let backward_rnn = gru(rnn_in, HIDDEN, GRUConfig::default(), vs.pp("gru_bwd"))?;
        let head = candle_nn::linear(2 * HIDDEN, 1, vs.pp("head"))?;
        Ok(Self {
            blocks,
            forward_rnn,
            backward_rnn,
            dropout: Dropout::new(0.2),
            head,
            varmap,
            training: true,
        })
    }
}

impl Classifier for SpectrogramNet {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        for block in &self.blocks {
            xs = block.forward(&xs)?;
        }
        // [B, C, F, T] -> [B, T, C * F]
        let (b_sz, c, f, t) = xs.dims4()?;
        let seq = xs.permute((0, 3, 1, 2))?.reshape((b_sz, t, c * f))?;

        if t == 0 {
            candle::bail!("input too short: no time steps left after pooling")
        }

        let fwd = self.forward_rnn.seq(&seq)?;
        let rev: Vec<u32> = (0..t as u32).rev().collect();
        let rev = Tensor::new(rev.as_slice(), seq.device())?;
        let bwd = self.backward_rnn.seq(&seq.index_select(&rev, 1)?)?;
        // Both directions read at the last time step of the input.
        let last = Tensor::cat(&[fwd[t - 1].h(), bwd[0].h()], 1)?;

        let last = self.dropout.forward_t(&last, self.training)?;
        candle_nn::ops::sigmoid(&last.apply(&self.head)?)?.squeeze(1)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_shape_and_range() -> Result<()> {
        let dev = Device::Cpu;
        let net = SpectrogramNet::new(64, &dev)?;
        let xs = Tensor::randn(0f32, 1., (2, 1, 64, 32), &dev)?;
        let probs = net.forward(&xs)?.to_vec1::<f32>()?;
        assert_eq!(probs.len(), 2);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
        Ok(())
    }

    #[test]
    fn rejects_unsupported_frequency_bins() {
        assert!(SpectrogramNet::new(48, &Device::Cpu).is_err());
    }
}
