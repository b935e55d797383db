//! Loading a network from a local model directory.
//!
//! The directory should contain:
//! - `config.json`: [`CascadedNetConfig`]
//! - `model.safetensors`: parameters named after the module tree
//!   (`stg1_low_band_net.0.enc1.conv.0.weight`, ...)
//!
//! ```no_run
//! use candle_core::{DType, Device};
//! use cascaded_net::model::loader::ModelLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let loader = ModelLoader::from_local_dir("/path/to/model")?;
//! let net = loader.load(&Device::Cpu, DType::F32)?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::VarBuilder;

use crate::{
    config::CascadedNetConfig,
    error::{SeparationError, SeparationResult},
    model::CascadedNet,
};

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

#[derive(Debug, Clone)]
pub struct ModelLoader {
    model_dir: PathBuf,
    config: CascadedNetConfig,
}

impl ModelLoader {
    /// Read and validate `config.json` from `model_dir`.
    pub fn from_local_dir(model_dir: impl AsRef<Path>) -> SeparationResult<Self> {
        let model_dir = model_dir.as_ref().to_path_buf();
        let config = CascadedNetConfig::from_file(model_dir.join(CONFIG_FILE))?;
        config.validate()?;

        tracing::debug!(dir = %model_dir.display(), ?config, "model config");
        Ok(Self { model_dir, config })
    }

    pub fn config(&self) -> &CascadedNetConfig {
        &self.config
    }

    /// Runtime switch; does not affect which weights are loaded.
    pub fn set_parallel_bands(&mut self, enabled: bool) {
        self.config.parallel_bands = enabled;
    }

    pub fn weights_path(&self) -> PathBuf {
        self.model_dir.join(WEIGHTS_FILE)
    }

    /// Memory-map the weights and build the network.
    pub fn load(&self, device: &Device, dtype: DType) -> SeparationResult<CascadedNet> {
        let weights = self.weights_path();
        if !weights.exists() {
            return Err(SeparationError::Io {
                path: weights.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "weights file not found"),
            });
        }

        tracing::info!(path = %weights.display(), ?dtype, ?device, "loading weights");
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[&weights], dtype, device)? };
        CascadedNet::new(&self.config, vb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::spectrogram::SpectralTensor;
    use candle_core::Tensor;

    fn small_config() -> CascadedNetConfig {
        CascadedNetConfig {
            nout: 4,
            nout_lstm: 4,
            offset: 1,
            ..CascadedNetConfig::new(32, 8)
        }
    }

    #[test]
    fn test_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ModelLoader::from_local_dir(dir.path()),
            Err(SeparationError::Io { .. })
        ));
    }

    #[test]
    fn test_missing_weights() -> SeparationResult<()> {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            serde_json::to_string(&small_config())?,
        )
        .unwrap();

        let loader = ModelLoader::from_local_dir(dir.path())?;
        assert_eq!(loader.config(), &small_config());
        assert!(matches!(
            loader.load(&Device::Cpu, DType::F32),
            Err(SeparationError::Io { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_load_saved_weights() -> SeparationResult<()> {
        let device = Device::Cpu;
        let dir = tempfile::tempdir().unwrap();
        let config = small_config();

        let (net, varmap) = CascadedNet::init_random(&config, &device, DType::F32)?;
        varmap.save(dir.path().join(WEIGHTS_FILE))?;
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            serde_json::to_string_pretty(&config)?,
        )
        .unwrap();

        let loaded = ModelLoader::from_local_dir(dir.path())?.load(&device, DType::F32)?;

        let x = SpectralTensor::from(Tensor::rand(0f32, 1.0, (1, 2, 17, 5), &device)?);
        let expected = net.forward(&x)?;
        let actual = loaded.forward(&x)?;
        let (SpectralTensor::Real(expected), SpectralTensor::Real(actual)) = (expected.y, actual.y)
        else {
            panic!("magnitude network produced a complex mask");
        };
        let diff = (expected - actual)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }
}
