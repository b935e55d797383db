//! Convolution + batch norm + activation unit.

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{
    Activation, BatchNorm, Conv2d, Conv2dConfig, VarBuilder, batch_norm, conv2d_no_bias,
};

use crate::nn::ops::expect_channels;

/// Negative slope used by encoder activations.
pub const LEAKY_SLOPE: f64 = 0.01;

/// Batch norm epsilon.
pub(crate) const BN_EPS: f64 = 1e-5;

/// 3x3 stride-1 convolution with independent dilation per axis.
///
/// candle's `Conv2d` takes one dilation for both axes, so the kernel is
/// evaluated tap by tap: each of the nine taps is a 1x1 convolution over a
/// shifted view of the zero-padded input, and the taps are summed. Padding
/// equals the dilation on each axis, which preserves the spatial shape.
#[derive(Debug, Clone)]
pub struct AtrousConv2d {
    weight: Tensor,
    dilation: (usize, usize),
}

impl AtrousConv2d {
    pub const KERNEL: usize = 3;

    pub fn new(
        in_channels: usize,
        out_channels: usize,
        dilation: (usize, usize),
        vb: VarBuilder,
    ) -> Result<Self> {
        let k = Self::KERNEL;
        let weight = vb.get_with_hints(
            (out_channels, in_channels, k, k),
            "weight",
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;
        Ok(Self { weight, dilation })
    }
}

impl Module for AtrousConv2d {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (_, _, height, width) = xs.dims4()?;
        let (dh, dw) = self.dilation;
        let padded = xs.pad_with_zeros(2, dh, dh)?.pad_with_zeros(3, dw, dw)?;

        let mut acc: Option<Tensor> = None;
        for i in 0..Self::KERNEL {
            for j in 0..Self::KERNEL {
                let tap = padded
                    .narrow(2, i * dh, height)?
                    .narrow(3, j * dw, width)?
                    .contiguous()?;
                // (out, in, 1, 1)
                let kernel = self.weight.narrow(2, i, 1)?.narrow(3, j, 1)?.contiguous()?;
                let term = tap.conv2d(&kernel, 0, 1, 1, 1)?;
                acc = Some(match acc {
                    Some(sum) => (sum + term)?,
                    None => term,
                });
            }
        }
        // KERNEL > 0, so at least one tap was accumulated.
        acc.ok_or_else(|| candle_core::Error::Msg("atrous conv has no taps".to_string()))
    }
}

#[derive(Debug, Clone)]
enum Conv {
    Dense(Conv2d),
    Atrous(AtrousConv2d),
}

impl Module for Conv {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Self::Dense(conv) => conv.forward(xs),
            Self::Atrous(conv) => conv.forward(xs),
        }
    }
}

/// Conv2d (no bias) -> BatchNorm2d -> activation.
///
/// Weights live under `conv.0` and `conv.1` so checkpoints exported from
/// the reference network load without renaming.
#[derive(Debug, Clone)]
pub struct ConvBlock {
    conv: Conv,
    norm: BatchNorm,
    activation: Activation,
    in_channels: usize,
    out_channels: usize,
    name: String,
}

impl ConvBlock {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        activation: Activation,
        vb: VarBuilder,
    ) -> Result<Self> {
        let config = Conv2dConfig {
            padding,
            stride,
            ..Default::default()
        };
        let conv = conv2d_no_bias(
            in_channels,
            out_channels,
            kernel_size,
            config,
            vb.pp("conv.0"),
        )?;
        Self::with_conv(Conv::Dense(conv), in_channels, out_channels, activation, vb)
    }

    /// 3x3 block with `(dilation_h, dilation_w)` and matching padding.
    pub fn atrous(
        in_channels: usize,
        out_channels: usize,
        dilation: (usize, usize),
        activation: Activation,
        vb: VarBuilder,
    ) -> Result<Self> {
        let conv = if dilation.0 == dilation.1 {
            let config = Conv2dConfig {
                padding: dilation.0,
                dilation: dilation.0,
                ..Default::default()
            };
            Conv::Dense(conv2d_no_bias(
                in_channels,
                out_channels,
                AtrousConv2d::KERNEL,
                config,
                vb.pp("conv.0"),
            )?)
        } else {
            Conv::Atrous(AtrousConv2d::new(
                in_channels,
                out_channels,
                dilation,
                vb.pp("conv.0"),
            )?)
        };
        Self::with_conv(conv, in_channels, out_channels, activation, vb)
    }

    fn with_conv(
        conv: Conv,
        in_channels: usize,
        out_channels: usize,
        activation: Activation,
        vb: VarBuilder,
    ) -> Result<Self> {
        let norm = batch_norm(out_channels, BN_EPS, vb.pp("conv.1"))?;
        Ok(Self {
            conv,
            norm,
            activation,
            in_channels,
            out_channels,
            name: vb.prefix(),
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
}

impl ModuleT for ConvBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        expect_channels(&self.name, xs, self.in_channels)?;
        let hidden = self.conv.forward(xs)?;
        let hidden = self.norm.forward_t(&hidden, train)?;
        self.activation.forward(&hidden)
    }
}
