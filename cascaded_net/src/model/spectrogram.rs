//! Real and complex spectrogram tensors.
//!
//! candle has no complex dtype, so complex spectrograms and masks are carried
//! as a pair of real tensors of identical shape.

use candle_core::{Result, Tensor, bail};

use crate::error::{SeparationError, SeparationResult};

/// Complex tensor stored as separate real and imaginary parts.
#[derive(Debug, Clone)]
pub struct ComplexTensor {
    pub re: Tensor,
    pub im: Tensor,
}

impl ComplexTensor {
    pub fn new(re: Tensor, im: Tensor) -> Result<Self> {
        if re.dims() != im.dims() {
            bail!(
                "real part {:?} and imaginary part {:?} differ in shape",
                re.dims(),
                im.dims()
            );
        }
        Ok(Self { re, im })
    }

    pub fn dims(&self) -> &[usize] {
        self.re.dims()
    }

    /// Elementwise magnitude `sqrt(re^2 + im^2)`.
    pub fn abs(&self) -> Result<Tensor> {
        (self.re.sqr()? + self.im.sqr()?)?.sqrt()
    }

    /// Elementwise complex product.
    pub fn mul(&self, rhs: &Self) -> Result<Self> {
        // (a + bi)(c + di) = (ac - bd) + (ad + bc)i
        let re = (self.re.mul(&rhs.re)? - self.im.mul(&rhs.im)?)?;
        let im = (self.re.mul(&rhs.im)? + self.im.mul(&rhs.re)?)?;
        Ok(Self { re, im })
    }

    /// Squash magnitudes into [0, 1) while keeping the phase:
    /// `z * tanh(|z|) / (|z| + eps)`.
    pub fn bounded(&self, eps: f64) -> Result<Self> {
        let magnitude = self.abs()?;
        let scale = magnitude.tanh()?.div(&(magnitude + eps)?)?;
        Ok(Self {
            re: self.re.mul(&scale)?,
            im: self.im.mul(&scale)?,
        })
    }

    fn map(&self, f: impl Fn(&Tensor) -> Result<Tensor>) -> Result<Self> {
        Ok(Self {
            re: f(&self.re)?,
            im: f(&self.im)?,
        })
    }
}

/// Spectrogram or mask in one of the two representations the network handles.
///
/// Shapes are (batch, channels, freq_bins, frames) per component.
#[derive(Debug, Clone)]
pub enum SpectralTensor {
    /// Magnitude spectrogram, or a sigmoid mask.
    Real(Tensor),
    /// Complex spectrogram, or a bounded complex mask.
    Complex(ComplexTensor),
}

impl SpectralTensor {
    pub fn dims(&self) -> &[usize] {
        match self {
            Self::Real(xs) => xs.dims(),
            Self::Complex(xs) => xs.dims(),
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, Self::Complex(_))
    }

    pub fn kind(&self) -> &'static str {
        if self.is_complex() { "complex" } else { "magnitude" }
    }

    /// Apply the same shape operation to every component.
    pub fn map(&self, f: impl Fn(&Tensor) -> Result<Tensor>) -> Result<Self> {
        Ok(match self {
            Self::Real(xs) => Self::Real(f(xs)?),
            Self::Complex(xs) => Self::Complex(xs.map(f)?),
        })
    }

    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self> {
        self.map(|xs| xs.narrow(dim, start, len))
    }

    /// Pad `dim` by repeating its edge values.
    pub fn pad_with_same(&self, dim: usize, left: usize, right: usize) -> Result<Self> {
        self.map(|xs| xs.pad_with_same(dim, left, right))
    }

    /// Stack the components on the channel axis: complex (b, c, f, t) becomes
    /// (b, 2c, f, t) with real parts first.
    pub fn to_channels(&self) -> Result<Tensor> {
        match self {
            Self::Real(xs) => Ok(xs.clone()),
            Self::Complex(xs) => Tensor::cat(&[&xs.re, &xs.im], 1),
        }
    }

    /// Inverse of [`Self::to_channels`]: the first half of the channels become
    /// the real part, the second half the imaginary part.
    pub fn from_channels(xs: Tensor, complex: bool) -> Result<Self> {
        if !complex {
            return Ok(Self::Real(xs));
        }
        let channels = xs.dim(1)?;
        if channels % 2 != 0 {
            bail!(
                "cannot split {:?} into real and imaginary halves",
                xs.dims()
            );
        }
        let half = channels / 2;
        Ok(Self::Complex(ComplexTensor::new(
            xs.narrow(1, 0, half)?,
            xs.narrow(1, half, half)?,
        )?))
    }

    /// Elementwise product with a mask of the same kind.
    pub fn apply_mask(&self, mask: &Self) -> SeparationResult<Self> {
        let product = match (self, mask) {
            (Self::Real(xs), Self::Real(mask)) => Self::Real(xs.mul(mask)?),
            (Self::Complex(xs), Self::Complex(mask)) => Self::Complex(xs.mul(mask)?),
            _ => {
                return Err(SeparationError::KindMismatch {
                    expected: self.kind(),
                    got: mask.kind(),
                });
            }
        };
        Ok(product)
    }

    pub fn to_dtype(&self, dtype: candle_core::DType) -> Result<Self> {
        self.map(|xs| xs.to_dtype(dtype))
    }
}

impl From<Tensor> for SpectralTensor {
    fn from(xs: Tensor) -> Self {
        Self::Real(xs)
    }
}

impl From<ComplexTensor> for SpectralTensor {
    fn from(xs: ComplexTensor) -> Self {
        Self::Complex(xs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_complex_mul() -> Result<()> {
        let device = Device::Cpu;
        // (1 + 2i)(3 - i) = 5 + 5i
        let a = ComplexTensor::new(Tensor::new(&[1f32], &device)?, Tensor::new(&[2f32], &device)?)?;
        let b = ComplexTensor::new(Tensor::new(&[3f32], &device)?, Tensor::new(&[-1f32], &device)?)?;
        let c = a.mul(&b)?;

        assert_eq!(c.re.to_vec1::<f32>()?, vec![5.0]);
        assert_eq!(c.im.to_vec1::<f32>()?, vec![5.0]);
        Ok(())
    }

    #[test]
    fn test_bounded_keeps_phase_and_limits_magnitude() -> Result<()> {
        let device = Device::Cpu;
        let re = Tensor::new(&[0f32, 3.0, -40.0, 1e-3], &device)?;
        let im = Tensor::new(&[0f32, 4.0, 25.0, -2e-3], &device)?;
        let mask = ComplexTensor::new(re, im)?.bounded(1e-8)?;

        let magnitude = mask.abs()?.to_vec1::<f32>()?;
        for m in &magnitude {
            assert!(m.is_finite());
            assert!((0.0..=1.0 + 1e-6).contains(m), "{m}");
        }
        // Zero stays zero instead of producing NaN.
        assert_eq!(magnitude[0], 0.0);
        // |3 + 4i| = 5 -> tanh(5)
        assert!((magnitude[1] - 5f32.tanh()).abs() < 1e-5);
        assert!(magnitude[3] < 0.01);

        // Phase is preserved: re/im ratio is unchanged.
        let out_re = mask.re.to_vec1::<f32>()?;
        let out_im = mask.im.to_vec1::<f32>()?;
        assert!((out_im[1] / out_re[1] - 4.0 / 3.0).abs() < 1e-5);
        assert!(out_re[2] < 0.0 && out_im[2] > 0.0);
        Ok(())
    }

    #[test]
    fn test_channel_round_trip_order() -> Result<()> {
        let device = Device::Cpu;
        let re = Tensor::ones((1, 2, 3, 4), DType::F32, &device)?;
        let im = Tensor::zeros((1, 2, 3, 4), DType::F32, &device)?;
        let spec = SpectralTensor::from(ComplexTensor::new(re, im)?);

        let stacked = spec.to_channels()?;
        assert_eq!(stacked.dims(), &[1, 4, 3, 4]);
        // Real parts occupy the first two channels.
        let per_channel = stacked.sum((0, 2, 3))?.to_vec1::<f32>()?;
        assert_eq!(per_channel, vec![12.0, 12.0, 0.0, 0.0]);

        let split = SpectralTensor::from_channels(stacked, true)?;
        assert!(split.is_complex());
        assert_eq!(split.dims(), &[1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn test_apply_mask_rejects_kind_mismatch() -> Result<()> {
        let device = Device::Cpu;
        let real = SpectralTensor::from(Tensor::ones((1, 2, 2, 2), DType::F32, &device)?);
        let complex = SpectralTensor::from(ComplexTensor::new(
            Tensor::ones((1, 2, 2, 2), DType::F32, &device)?,
            Tensor::ones((1, 2, 2, 2), DType::F32, &device)?,
        )?);

        assert!(matches!(
            real.apply_mask(&complex),
            Err(SeparationError::KindMismatch { .. })
        ));
        Ok(())
    }
}
