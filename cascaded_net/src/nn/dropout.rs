//! Channel dropout.

use candle_core::{DType, Result, Tensor};
use candle_nn::ModuleT;

/// Zeroes whole feature maps with probability `p` while training.
///
/// Surviving channels are scaled by `1 / (1 - p)`. Identity at inference.
#[derive(Debug, Clone, Copy)]
pub struct ChannelDropout {
    p: f32,
}

impl ChannelDropout {
    pub fn new(p: f32) -> Self {
        Self { p }
    }
}

impl ModuleT for ChannelDropout {
    /// Input shape: (batch, channels, height, width)
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        if !train || self.p <= 0.0 {
            return Ok(xs.clone());
        }
        let (batch, channels, _, _) = xs.dims4()?;
        let keep = Tensor::rand(0f32, 1f32, (batch, channels, 1, 1), xs.device())?
            .ge(self.p)?
            .to_dtype(DType::F32)?;
        let scale = (keep / (1.0 - self.p as f64))?.to_dtype(xs.dtype())?;
        xs.broadcast_mul(&scale)
    }
}
