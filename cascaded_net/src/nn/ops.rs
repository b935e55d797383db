//! Tensor helpers shared by the layer stack.

use candle_core::{Result, Tensor, bail};

/// Check that `xs` is (batch, channels, height, width) with the expected channel count.
///
/// Returns the four dimensions so callers don't have to re-query them.
pub fn expect_channels(
    block: &str,
    xs: &Tensor,
    channels: usize,
) -> Result<(usize, usize, usize, usize)> {
    if xs.rank() != 4 {
        bail!(
            "shape mismatch in {block}: expected (batch, {channels}, height, width), got {:?}",
            xs.dims()
        );
    }
    let dims = xs.dims4()?;
    if dims.1 != channels {
        bail!(
            "shape mismatch in {block}: expected {channels} input channels, got {:?}",
            xs.dims()
        );
    }
    Ok(dims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_expect_channels_reports_shape() -> Result<()> {
        let device = Device::Cpu;
        let xs = Tensor::zeros((1, 3, 4, 4), DType::F32, &device)?;

        assert!(expect_channels("enc1", &xs, 3).is_ok());
        let err = expect_channels("enc1", &xs, 2).unwrap_err().to_string();
        assert!(err.contains("enc1"), "{err}");
        assert!(err.contains("[1, 3, 4, 4]"), "{err}");
        Ok(())
    }

    #[test]
    fn test_expect_channels_rejects_rank() -> Result<()> {
        let device = Device::Cpu;
        let xs = Tensor::zeros((3, 4, 4), DType::F32, &device)?;

        assert!(expect_channels("enc1", &xs, 3).is_err());
        Ok(())
    }
}
