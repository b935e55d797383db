//! Downsampling encoder block.

use candle_core::{ModuleT, Result, Tensor};
use candle_nn::{Activation, VarBuilder};

use crate::nn::conv_block::{ConvBlock, LEAKY_SLOPE};

/// Two leaky-ReLU conv blocks; the first is strided.
///
/// (batch, in, H, W) -> (batch, out, ceil(H / stride), ceil(W / stride)) for
/// kernel 3 / padding 1.
#[derive(Debug, Clone)]
pub struct Encoder {
    conv1: ConvBlock,
    conv2: ConvBlock,
}

impl Encoder {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let activation = Activation::LeakyRelu(LEAKY_SLOPE);
        let conv1 = ConvBlock::new(
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding,
            activation,
            vb.pp("conv1"),
        )?;
        let conv2 = ConvBlock::new(
            out_channels,
            out_channels,
            kernel_size,
            1,
            padding,
            activation,
            vb.pp("conv2"),
        )?;
        Ok(Self { conv1, conv2 })
    }

    pub fn out_channels(&self) -> usize {
        self.conv2.out_channels()
    }
}

impl ModuleT for Encoder {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let hidden = self.conv1.forward_t(xs, train)?;
        self.conv2.forward_t(&hidden, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_encoder_halves_resolution() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let encoder = Encoder::new(4, 8, 3, 2, 1, vb)?;
        let input = Tensor::randn(0f32, 1.0, (2, 4, 16, 11), &device)?;
        let output = encoder.forward_t(&input, false)?;

        assert_eq!(output.dims(), &[2, 8, 8, 6]);
        Ok(())
    }

    #[test]
    fn test_encoder_odd_sizes_round_up() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let encoder = Encoder::new(2, 2, 3, 2, 1, vb)?;
        let input = Tensor::randn(0f32, 1.0, (1, 2, 1, 3), &device)?;
        let output = encoder.forward_t(&input, false)?;

        assert_eq!(output.dims(), &[1, 2, 1, 2]);
        Ok(())
    }
}
