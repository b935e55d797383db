//! Atrous spatial pyramid pooling.
//!
//! Multi-scale context at the bottleneck without reducing resolution:
//! - a frequency-pooled global branch
//! - a 1x1 branch
//! - one 3x3 atrous branch per `(dilation_h, dilation_w)` pair
//!
//! The branches are concatenated and fused by a 1x1 bottleneck block.

use candle_core::{ModuleT, Result, Tensor, bail};
use candle_nn::{Activation, VarBuilder};

use crate::nn::{conv_block::ConvBlock, decoder::DROPOUT_RATE, dropout::ChannelDropout};

#[derive(Debug, Clone)]
pub struct AsppModule {
    pooled: ConvBlock,
    pointwise: ConvBlock,
    atrous: Vec<ConvBlock>,
    bottleneck: ConvBlock,
    dropout: Option<ChannelDropout>,
}

impl AsppModule {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        dilations: &[(usize, usize)],
        dropout: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        if dilations.is_empty() {
            bail!("ASPP at {} needs at least one dilation pair", vb.prefix());
        }

        let pooled = ConvBlock::new(
            in_channels,
            out_channels,
            1,
            1,
            0,
            Activation::Relu,
            vb.pp("conv1.1"),
        )?;
        let pointwise = ConvBlock::new(
            in_channels,
            out_channels,
            1,
            1,
            0,
            Activation::Relu,
            vb.pp("conv2"),
        )?;
        let atrous = dilations
            .iter()
            .enumerate()
            .map(|(i, &dilation)| {
                ConvBlock::atrous(
                    in_channels,
                    out_channels,
                    dilation,
                    Activation::Relu,
                    vb.pp(format!("conv{}", i + 3)),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let branches = 2 + atrous.len();
        let bottleneck = ConvBlock::new(
            out_channels * branches,
            out_channels,
            1,
            1,
            0,
            Activation::Relu,
            vb.pp("bottleneck"),
        )?;

        Ok(Self {
            pooled,
            pointwise,
            atrous,
            bottleneck,
            dropout: dropout.then(|| ChannelDropout::new(DROPOUT_RATE)),
        })
    }

    pub fn out_channels(&self) -> usize {
        self.bottleneck.out_channels()
    }
}

impl ModuleT for AsppModule {
    /// Input shape: (batch, in, H, W)
    /// Output shape: (batch, out, H, W)
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, _, height, width) = xs.dims4()?;

        // Average over frequency only, keeping the time axis:
        // (batch, in, H, W) -> (batch, in, 1, W) -> (batch, out, 1, W) -> (batch, out, H, W)
        let global = xs.mean_keepdim(2)?;
        let global = self.pooled.forward_t(&global, train)?;
        let global = global
            .broadcast_as((batch, self.pooled.out_channels(), height, width))?
            .contiguous()?;

        let mut features = Vec::with_capacity(2 + self.atrous.len());
        features.push(global);
        features.push(self.pointwise.forward_t(xs, train)?);
        for branch in &self.atrous {
            features.push(branch.forward_t(xs, train)?);
        }

        let hidden = Tensor::cat(&features, 1)?;
        let hidden = self.bottleneck.forward_t(&hidden, train)?;

        match &self.dropout {
            Some(dropout) => dropout.forward_t(&hidden, train),
            None => Ok(hidden),
        }
    }
}
