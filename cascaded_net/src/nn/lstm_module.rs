//! Recurrent bottleneck: a bidirectional LSTM over time.

use candle_core::{ModuleT, Result, Tensor, bail};
use candle_nn::{
    Activation, BatchNorm, LSTM, LSTMConfig, Linear, Module, RNN, VarBuilder, batch_norm, linear,
    lstm, rnn::Direction,
};

use crate::nn::conv_block::{BN_EPS, ConvBlock};

/// Single-layer bidirectional LSTM over (batch, seq, features).
///
/// Weights follow the PyTorch layout: `weight_ih_l0`, `weight_hh_l0`, ... and
/// the same names with a `_reverse` suffix for the backward direction.
#[derive(Debug, Clone)]
pub struct BiLstm {
    forward_cell: LSTM,
    backward_cell: LSTM,
}

impl BiLstm {
    pub fn new(in_dim: usize, hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        let forward_cell = lstm(
            in_dim,
            hidden_dim,
            LSTMConfig {
                direction: Direction::Forward,
                ..Default::default()
            },
            vb.clone(),
        )?;
        let backward_cell = lstm(
            in_dim,
            hidden_dim,
            LSTMConfig {
                direction: Direction::Backward,
                ..Default::default()
            },
            vb,
        )?;
        Ok(Self {
            forward_cell,
            backward_cell,
        })
    }
}

impl Module for BiLstm {
    /// Input shape: (batch, seq, in_dim)
    /// Output shape: (batch, seq, 2 * hidden_dim), forward states first.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = xs.contiguous()?;
        let states = self.forward_cell.seq(&xs)?;
        let forward = self.forward_cell.states_to_tensor(&states)?;

        // The backward cell reads the sequence last-to-first; flip its outputs
        // back so both directions are aligned per time step.
        let reversed = xs.flip(&[1])?.contiguous()?;
        let states = self.backward_cell.seq(&reversed)?;
        let backward = self.backward_cell.states_to_tensor(&states)?.flip(&[1])?;

        Tensor::cat(&[forward, backward], 2)
    }
}

/// Collapses a feature map to one channel, runs a BiLSTM across time frames,
/// and projects each frame back to `nin_lstm` frequency bins.
///
/// (batch, C, nin_lstm, W) -> (batch, 1, nin_lstm, W)
#[derive(Debug, Clone)]
pub struct LstmModule {
    conv: ConvBlock,
    lstm: BiLstm,
    dense: Linear,
    norm: BatchNorm,
    nin_lstm: usize,
    name: String,
}

impl LstmModule {
    pub fn new(
        nin_conv: usize,
        nin_lstm: usize,
        nout_lstm: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        if nout_lstm < 2 || nout_lstm % 2 != 0 {
            bail!(
                "LSTM output width at {} must be even and at least 2, got {nout_lstm}",
                vb.prefix()
            );
        }

        let conv = ConvBlock::new(nin_conv, 1, 1, 1, 0, Activation::Relu, vb.pp("conv"))?;
        let lstm = BiLstm::new(nin_lstm, nout_lstm / 2, vb.pp("lstm"))?;
        let dense = linear(nout_lstm, nin_lstm, vb.pp("dense.0"))?;
        let norm = batch_norm(nin_lstm, BN_EPS, vb.pp("dense.1"))?;

        Ok(Self {
            conv,
            lstm,
            dense,
            norm,
            nin_lstm,
            name: vb.prefix(),
        })
    }
}

impl ModuleT for LstmModule {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, _, bins, frames) = xs.dims4()?;
        if bins != self.nin_lstm {
            bail!(
                "shape mismatch in {}: expected {} frequency bins, got {:?}",
                self.name,
                self.nin_lstm,
                xs.dims()
            );
        }

        // (batch, C, bins, frames) -> (batch, bins, frames) -> (batch, frames, bins)
        let hidden = self.conv.forward_t(xs, train)?.squeeze(1)?;
        let hidden = hidden.transpose(1, 2)?.contiguous()?;

        // (batch, frames, nout_lstm)
        let hidden = self.lstm.forward(&hidden)?;
        let width = hidden.dim(2)?;

        // Per-frame projection: (batch * frames, nout_lstm) -> (batch * frames, bins)
        let hidden = hidden.reshape((batch * frames, width))?;
        let hidden = self.dense.forward(&hidden)?;
        let hidden = self.norm.forward_t(&hidden, train)?.relu()?;

        // (batch, frames, bins) -> (batch, 1, bins, frames)
        hidden
            .reshape((batch, frames, bins))?
            .transpose(1, 2)?
            .unsqueeze(1)?
            .contiguous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_bilstm_shape() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let lstm = BiLstm::new(6, 4, vb)?;
        let input = Tensor::randn(0f32, 1.0, (3, 7, 6), &device)?;
        let output = lstm.forward(&input)?;

        assert_eq!(output.dims(), &[3, 7, 8]);
        Ok(())
    }

    #[test]
    fn test_bilstm_backward_sees_future() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let lstm = BiLstm::new(3, 2, vb)?;
        let input = Tensor::randn(0f32, 1.0, (1, 5, 3), &device)?;
        let output = lstm.forward(&input)?;

        // Perturb only the last frame.
        let head = input.narrow(1, 0, 4)?;
        let tail = (input.narrow(1, 4, 1)? + 1.0)?;
        let perturbed = Tensor::cat(&[head, tail], 1)?;
        let changed = lstm.forward(&perturbed)?;

        // The first frame's forward half cannot see the change, its backward half can.
        let first = output.narrow(1, 0, 1)?;
        let first_changed = changed.narrow(1, 0, 1)?;
        let forward_diff = (first.narrow(2, 0, 2)? - first_changed.narrow(2, 0, 2)?)?
            .abs()?
            .max_all()?
            .to_scalar::<f32>()?;
        let backward_diff = (first.narrow(2, 2, 2)? - first_changed.narrow(2, 2, 2)?)?
            .abs()?
            .max_all()?
            .to_scalar::<f32>()?;
        assert_eq!(forward_diff, 0.0);
        assert!(backward_diff > 0.0);
        Ok(())
    }

    #[test]
    fn test_lstm_module_shape() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let module = LstmModule::new(8, 16, 12, vb)?;
        let input = Tensor::randn(0f32, 1.0, (2, 8, 16, 9), &device)?;
        let output = module.forward_t(&input, false)?;

        assert_eq!(output.dims(), &[2, 1, 16, 9]);
        assert!(output.min_all()?.to_scalar::<f32>()? >= 0.0);
        Ok(())
    }

    #[test]
    fn test_lstm_module_parameter_names() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let _ = LstmModule::new(4, 8, 6, vb.pp("lstm_dec2"))?;

        let data = varmap.data().lock().unwrap();
        for name in [
            "lstm_dec2.conv.conv.0.weight",
            "lstm_dec2.lstm.weight_ih_l0",
            "lstm_dec2.lstm.weight_hh_l0",
            "lstm_dec2.lstm.bias_ih_l0",
            "lstm_dec2.lstm.weight_ih_l0_reverse",
            "lstm_dec2.lstm.bias_hh_l0_reverse",
            "lstm_dec2.dense.0.weight",
            "lstm_dec2.dense.0.bias",
            "lstm_dec2.dense.1.running_var",
        ] {
            assert!(data.contains_key(name), "missing {name}");
        }
        // 4 gates x hidden 3, input 8
        assert_eq!(data["lstm_dec2.lstm.weight_ih_l0"].as_tensor().dims(), &[12, 8]);
        Ok(())
    }

    #[test]
    fn test_lstm_module_rejects_wrong_bins() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let module = LstmModule::new(4, 16, 8, vb)?;
        let input = Tensor::randn(0f32, 1.0, (1, 4, 15, 3), &device)?;

        assert!(module.forward_t(&input, false).is_err());
        Ok(())
    }
}
