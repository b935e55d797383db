//! Upsampling decoder block.

use candle_core::{ModuleT, Result, Tensor, bail};
use candle_nn::{Activation, VarBuilder};

use crate::nn::{conv_block::ConvBlock, dropout::ChannelDropout};

/// Dropout rate used wherever dropout is enabled.
pub const DROPOUT_RATE: f32 = 0.1;

/// Resizes to the skip connection, concatenates, and fuses with a conv block.
#[derive(Debug, Clone)]
pub struct Decoder {
    conv1: ConvBlock,
    dropout: Option<ChannelDropout>,
    name: String,
}

impl Decoder {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        padding: usize,
        dropout: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let conv1 = ConvBlock::new(
            in_channels,
            out_channels,
            kernel_size,
            1,
            padding,
            Activation::Relu,
            vb.pp("conv1"),
        )?;
        Ok(Self {
            conv1,
            dropout: dropout.then(|| ChannelDropout::new(DROPOUT_RATE)),
            name: vb.prefix(),
        })
    }

    pub fn in_channels(&self) -> usize {
        self.conv1.in_channels()
    }

    pub fn out_channels(&self) -> usize {
        self.conv1.out_channels()
    }

    /// Bilinear resize with aligned corners: the first and last bins and
    /// frames of `xs` land exactly on those of the output.
    fn align(xs: &Tensor, height: usize, width: usize) -> Result<Tensor> {
        xs.upsample_bilinear2d(height, width, true)
    }

    /// Forward pass.
    ///
    /// `xs`: (batch, C_h, H, W), `skip`: (batch, C_skip, H_skip, W_skip) with
    /// H_skip >= H and W_skip >= W.
    /// Output: (batch, out, H_skip, W_skip).
    pub fn forward_t(&self, xs: &Tensor, skip: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, _, height, width) = xs.dims4()?;
        let (skip_batch, _, skip_height, skip_width) = skip.dims4()?;
        if batch != skip_batch || skip_height < height || skip_width < width {
            bail!(
                "shape mismatch in {}: cannot align {:?} to skip connection {:?}",
                self.name,
                xs.dims(),
                skip.dims()
            );
        }

        let hidden = Self::align(xs, skip_height, skip_width)?;
        let hidden = Tensor::cat(&[&hidden, skip], 1)?;
        let hidden = self.conv1.forward_t(&hidden, train)?;

        match &self.dropout {
            Some(dropout) => dropout.forward_t(&hidden, train),
            None => Ok(hidden),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_decoder_matches_skip_shape() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let decoder = Decoder::new(8 + 4, 4, 3, 1, false, vb)?;
        let xs = Tensor::randn(0f32, 1.0, (2, 8, 4, 3), &device)?;
        let skip = Tensor::randn(0f32, 1.0, (2, 4, 8, 5), &device)?;
        let output = decoder.forward_t(&xs, &skip, false)?;

        assert_eq!(output.dims(), &[2, 4, 8, 5]);
        Ok(())
    }

    #[test]
    fn test_align_keeps_corners() -> Result<()> {
        let device = Device::Cpu;
        let xs = Tensor::new(&[0f32, 3.0], &device)?.reshape((1, 1, 1, 2))?;
        let aligned = Decoder::align(&xs, 1, 4)?;

        let values = aligned.flatten_all()?.to_vec1::<f32>()?;
        for (got, want) in values.iter().zip([0.0f32, 1.0, 2.0, 3.0]) {
            assert!((got - want).abs() < 1e-5, "{values:?}");
        }

        // A single row is broadcast rather than extrapolated.
        let row = Tensor::new(&[1f32, 2.0, 3.0], &device)?.reshape((1, 1, 1, 3))?;
        let aligned = Decoder::align(&row, 4, 3)?;
        for values in aligned.squeeze(0)?.squeeze(0)?.to_vec2::<f32>()? {
            for (got, want) in values.iter().zip([1.0f32, 2.0, 3.0]) {
                assert!((got - want).abs() < 1e-5, "{values:?}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_decoder_rejects_smaller_skip() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let decoder = Decoder::new(8, 4, 3, 1, false, vb.pp("dec"))?;
        let xs = Tensor::randn(0f32, 1.0, (1, 4, 8, 8), &device)?;
        let skip = Tensor::randn(0f32, 1.0, (1, 4, 4, 8), &device)?;
        let err = decoder.forward_t(&xs, &skip, false).unwrap_err().to_string();

        assert!(err.contains("dec"), "{err}");
        assert!(err.contains("[1, 4, 4, 8]"), "{err}");
        Ok(())
    }

    #[test]
    fn test_decoder_rejects_wrong_channel_sum() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let decoder = Decoder::new(10, 4, 3, 1, false, vb)?;
        let xs = Tensor::randn(0f32, 1.0, (1, 4, 2, 2), &device)?;
        let skip = Tensor::randn(0f32, 1.0, (1, 4, 4, 4), &device)?;

        assert!(decoder.forward_t(&xs, &skip, false).is_err());
        Ok(())
    }
}
