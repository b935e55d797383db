//! The cascaded band-split separation network.
//!
//! ```no_run
//! use candle_core::{DType, Device, Tensor};
//! use cascaded_net::{CascadedNet, CascadedNetConfig, SpectralTensor};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CascadedNetConfig::new(2048, 1024);
//! let (net, _varmap) = CascadedNet::init_random(&config, &Device::Cpu, DType::F32)?;
//!
//! let mix = Tensor::rand(0f32, 1.0, (1, 2, 1025, 256), &Device::Cpu)?;
//! let masks = net.predict_mask(&SpectralTensor::from(mix))?;
//! # Ok(())
//! # }
//! ```

pub mod loader;
pub mod spectrogram;

use candle_core::{DType, Device, ModuleT, Tensor};
use candle_nn::{Activation, Conv2d, Module, VarBuilder, VarMap, conv2d_no_bias};

use crate::{
    config::CascadedNetConfig,
    error::{SeparationError, SeparationResult},
    model::spectrogram::SpectralTensor,
    nn::{base_net::BaseNet, conv_block::ConvBlock},
};

/// Keeps bounded complex masks finite when the raw mask is zero.
pub const MASK_EPS: f64 = 1e-8;

/// Target-source (`y`) and residual (`v`) masks.
#[derive(Debug, Clone)]
pub struct Masks {
    pub y: SpectralTensor,
    pub v: SpectralTensor,
}

/// Masked input spectrograms for the target source and the residual.
#[derive(Debug, Clone)]
pub struct Separated {
    pub y: SpectralTensor,
    pub v: SpectralTensor,
}

/// A band sub-network, optionally followed by a 1x1 channel projection.
///
/// With a projection the parameters live under `<prefix>.0` and `<prefix>.1`.
#[derive(Debug, Clone)]
struct BandNet {
    net: BaseNet,
    proj: Option<ConvBlock>,
}

impl BandNet {
    fn new(
        net: impl FnOnce(VarBuilder) -> candle_core::Result<BaseNet>,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        Ok(Self {
            net: net(vb)?,
            proj: None,
        })
    }

    fn projected(
        net: impl FnOnce(VarBuilder) -> candle_core::Result<BaseNet>,
        out_channels: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let net = net(vb.pp("0"))?;
        let proj = ConvBlock::new(
            net.out_channels(),
            out_channels,
            1,
            1,
            0,
            Activation::Relu,
            vb.pp("1"),
        )?;
        Ok(Self {
            net,
            proj: Some(proj),
        })
    }

    fn out_channels(&self) -> usize {
        match &self.proj {
            Some(proj) => proj.out_channels(),
            None => self.net.out_channels(),
        }
    }
}

impl ModuleT for BandNet {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let hidden = self.net.forward_t(xs, train)?;
        match &self.proj {
            Some(proj) => proj.forward_t(&hidden, train),
            None => Ok(hidden),
        }
    }
}

/// Three-stage cascade over a low band, a high band and the full band.
///
/// Input: (batch, 2, F, T) magnitude or complex spectrogram with F >= `max_bin`.
/// Output: `y` and `v` masks of shape (batch, 2, `output_bin`, T).
#[derive(Debug, Clone)]
pub struct CascadedNet {
    stg1_low_band_net: BandNet,
    stg1_high_band_net: BandNet,
    stg2_low_band_net: BandNet,
    stg2_high_band_net: BandNet,
    stg3_full_band_net: BandNet,
    out_y: Conv2d,
    out_v: Conv2d,
    config: CascadedNetConfig,
}

impl CascadedNet {
    pub fn new(config: &CascadedNetConfig, vb: VarBuilder) -> SeparationResult<Self> {
        config.validate()?;

        let nin = config.nin();
        let nout = config.nout;
        let nout_lstm = config.nout_lstm;
        let nin_lstm = config.nin_lstm();
        let dilations = config.dilations.as_slice();

        let stg1_low_band_net = BandNet::projected(
            |vb| BaseNet::new(nin, nout / 2, nin_lstm / 2, nout_lstm, dilations, vb),
            nout / 4,
            vb.pp("stg1_low_band_net"),
        )?;
        let stg1_high_band_net = BandNet::new(
            |vb| BaseNet::new(nin, nout / 4, nin_lstm / 2, nout_lstm / 2, dilations, vb),
            vb.pp("stg1_high_band_net"),
        )?;

        let stg2_low_band_net = BandNet::projected(
            |vb| BaseNet::new(nout / 4 + nin, nout, nin_lstm / 2, nout_lstm, dilations, vb),
            nout / 2,
            vb.pp("stg2_low_band_net"),
        )?;
        let stg2_high_band_net = BandNet::new(
            |vb| BaseNet::new(nout / 4 + nin, nout / 2, nin_lstm / 2, nout_lstm / 2, dilations, vb),
            vb.pp("stg2_high_band_net"),
        )?;

        let stg3_full_band_net = BandNet::new(
            |vb| BaseNet::new(3 * nout / 4 + nin, nout, nin_lstm, nout_lstm, dilations, vb),
            vb.pp("stg3_full_band_net"),
        )?;

        let out_y = conv2d_no_bias(nout, nin, 1, Default::default(), vb.pp("out_y"))?;
        let out_v = conv2d_no_bias(nout, nin, 1, Default::default(), vb.pp("out_v"))?;

        // Stage 2 and 3 inputs are sized from stage 1 and 2 outputs.
        let stage3_in = nin + stg1_low_band_net.out_channels() + stg2_low_band_net.out_channels();
        if stg1_low_band_net.out_channels() != stg1_high_band_net.out_channels()
            || stg2_low_band_net.out_channels() != stg2_high_band_net.out_channels()
            || stg3_full_band_net.net.in_channels() != stage3_in
        {
            return Err(SeparationError::InvalidConfig(format!(
                "band outputs do not line up for nout={nout}"
            )));
        }

        tracing::debug!(
            n_fft = config.n_fft,
            nin,
            nout,
            nout_lstm,
            nin_lstm,
            is_complex = config.is_complex,
            "cascaded net"
        );

        Ok(Self {
            stg1_low_band_net,
            stg1_high_band_net,
            stg2_low_band_net,
            stg2_high_band_net,
            stg3_full_band_net,
            out_y,
            out_v,
            config: config.clone(),
        })
    }

    /// Build a freshly initialised network, returning the variables that back it.
    pub fn init_random(
        config: &CascadedNetConfig,
        device: &Device,
        dtype: DType,
    ) -> SeparationResult<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, dtype, device);
        let net = Self::new(config, vb)?;
        Ok((net, varmap))
    }

    pub fn config(&self) -> &CascadedNetConfig {
        &self.config
    }

    /// Masks for every input frame, in inference mode.
    pub fn forward(&self, x: &SpectralTensor) -> SeparationResult<Masks> {
        self.forward_t(x, false)
    }

    /// Masks for every input frame.
    ///
    /// `train` switches batch norm to batch statistics and enables dropout.
    pub fn forward_t(&self, x: &SpectralTensor, train: bool) -> SeparationResult<Masks> {
        let xs = self.input_channels(x)?;
        let max_bin = self.config.max_bin();

        // (batch, nin, F, T) -> (batch, nin, max_bin, T)
        let xs = xs.narrow(2, 0, max_bin)?;
        let (low, high) = self.split_bands(&xs)?;

        let (l1, h1) = self.run_bands(
            &self.stg1_low_band_net,
            &low,
            &self.stg1_high_band_net,
            &high,
            train,
        )?;
        let aux1 = Tensor::cat(&[&l1, &h1], 2)?;
        self.expect_full_band("stage 1", &aux1)?;

        let l2_in = Tensor::cat(&[&low, &l1], 1)?;
        let h2_in = Tensor::cat(&[&high, &h1], 1)?;
        let (l2, h2) = self.run_bands(
            &self.stg2_low_band_net,
            &l2_in,
            &self.stg2_high_band_net,
            &h2_in,
            train,
        )?;
        let aux2 = Tensor::cat(&[&l2, &h2], 2)?;
        self.expect_full_band("stage 2", &aux2)?;

        let f3_in = Tensor::cat(&[&xs, &aux1, &aux2], 1)?;
        let f3 = self.stg3_full_band_net.forward_t(&f3_in, train)?;

        let y = self.bound(self.out_y.forward(&f3)?)?;
        let v = self.bound(self.out_v.forward(&f3)?)?;

        // Replicate the top bin up to the full STFT extent.
        let pad = self.config.output_bin() - max_bin;
        let masks = Masks {
            y: y.pad_with_same(2, 0, pad)?,
            v: v.pad_with_same(2, 0, pad)?,
        };

        tracing::debug!(
            input = ?x.dims(),
            aux1 = ?aux1.dims(),
            aux2 = ?aux2.dims(),
            full_band = ?f3.dims(),
            mask = ?masks.y.dims(),
            "cascaded net forward"
        );
        Ok(masks)
    }

    /// Masks with `offset` frames trimmed from both ends.
    pub fn predict_mask(&self, x: &SpectralTensor) -> SeparationResult<Masks> {
        self.check_trim(x)?;
        let masks = self.forward(x)?;
        Ok(Masks {
            y: self.trim(&masks.y)?,
            v: self.trim(&masks.v)?,
        })
    }

    /// Input multiplied by each mask, trimmed like [`Self::predict_mask`].
    ///
    /// The input is aligned to `output_bin` frequency bins before masking.
    pub fn predict(&self, x: &SpectralTensor) -> SeparationResult<Separated> {
        self.check_trim(x)?;
        let masks = self.forward(x)?;

        let output_bin = self.config.output_bin();
        let bins = x.dims()[2];
        let aligned = if bins >= output_bin {
            x.narrow(2, 0, output_bin)?
        } else {
            x.pad_with_same(2, 0, output_bin - bins)?
        };

        let y = aligned.apply_mask(&masks.y)?;
        let v = aligned.apply_mask(&masks.v)?;
        Ok(Separated {
            y: self.trim(&y)?,
            v: self.trim(&v)?,
        })
    }

    /// Validate `x` against the configuration and stack it into network channels.
    fn input_channels(&self, x: &SpectralTensor) -> SeparationResult<Tensor> {
        if x.is_complex() != self.config.is_complex {
            return Err(SeparationError::KindMismatch {
                expected: if self.config.is_complex { "complex" } else { "magnitude" },
                got: x.kind(),
            });
        }
        if x.dims().len() != 4 {
            return Err(SeparationError::ShapeMismatch {
                stage: "input",
                expected: "(batch, channels, bins, frames)".to_string(),
                got: x.dims().to_vec(),
            });
        }

        let xs = x.to_channels()?;
        let (_, channels, bins, _) = xs.dims4()?;
        if channels != self.config.nin() {
            return Err(SeparationError::ShapeMismatch {
                stage: "input",
                expected: format!("{} stacked channels", self.config.nin()),
                got: xs.dims().to_vec(),
            });
        }
        if bins < self.config.max_bin() {
            return Err(SeparationError::ShapeMismatch {
                stage: "input",
                expected: format!("at least {} frequency bins", self.config.max_bin()),
                got: xs.dims().to_vec(),
            });
        }
        Ok(xs)
    }

    /// Low band: the first `max_bin / 2` bins. High band: the rest of the
    /// modelled bins. Bins at or above `max_bin` go to neither.
    fn split_bands(&self, xs: &Tensor) -> SeparationResult<(Tensor, Tensor)> {
        let low_bins = self.config.low_band_bins();
        let high_bins = self.config.high_band_bins();
        let low = xs.narrow(2, 0, low_bins)?;
        let high = xs.narrow(2, low_bins, high_bins)?;
        Ok((low, high))
    }

    fn run_bands(
        &self,
        low_net: &BandNet,
        low: &Tensor,
        high_net: &BandNet,
        high: &Tensor,
        train: bool,
    ) -> SeparationResult<(Tensor, Tensor)> {
        let (low, high) = if self.config.parallel_bands {
            rayon::join(
                || low_net.forward_t(low, train),
                || high_net.forward_t(high, train),
            )
        } else {
            (low_net.forward_t(low, train), high_net.forward_t(high, train))
        };
        Ok((low?, high?))
    }

    fn expect_full_band(&self, stage: &'static str, aux: &Tensor) -> SeparationResult<()> {
        let max_bin = self.config.max_bin();
        if aux.dim(2)? != max_bin {
            return Err(SeparationError::ShapeMismatch {
                stage,
                expected: format!("{max_bin} frequency bins after band concatenation"),
                got: aux.dims().to_vec(),
            });
        }
        Ok(())
    }

    /// Raw head output to a mask: sigmoid for magnitude, bounded normalisation
    /// for complex (real parts in the first half of the channels).
    fn bound(&self, raw: Tensor) -> SeparationResult<SpectralTensor> {
        let mask = match SpectralTensor::from_channels(raw, self.config.is_complex)? {
            SpectralTensor::Complex(mask) => SpectralTensor::Complex(mask.bounded(MASK_EPS)?),
            SpectralTensor::Real(mask) => SpectralTensor::Real(candle_nn::ops::sigmoid(&mask)?),
        };
        Ok(mask)
    }

    fn check_trim(&self, x: &SpectralTensor) -> SeparationResult<()> {
        let offset = self.config.offset;
        let Some(&frames) = x.dims().get(3) else {
            return Err(SeparationError::ShapeMismatch {
                stage: "input",
                expected: "(batch, channels, bins, frames)".to_string(),
                got: x.dims().to_vec(),
            });
        };
        // An offset too large to double trims everything.
        if offset > 0 && offset.checked_mul(2).is_none_or(|both_ends| frames <= both_ends) {
            return Err(SeparationError::DegenerateTrim { frames, offset });
        }
        Ok(())
    }

    fn trim(&self, xs: &SpectralTensor) -> SeparationResult<SpectralTensor> {
        let offset = self.config.offset;
        if offset == 0 {
            return Ok(xs.clone());
        }
        let frames = xs.dims()[3];
        Ok(xs.narrow(3, offset, frames - 2 * offset)?)
    }
}
