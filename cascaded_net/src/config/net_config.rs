//! CascadedNet construction parameters.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SeparationError, SeparationResult};

/// Configuration for [`crate::model::CascadedNet`].
///
/// Typically loaded from `config.json` next to the weights. Only `n_fft` and
/// `hop_length` are required; everything else defaults to the values the
/// reference network was trained with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadedNetConfig {
    /// STFT size. Determines `max_bin`, `output_bin` and `nin_lstm`.
    pub n_fft: usize,

    /// STFT hop. Carried for the caller's transform alignment, never read by the network.
    pub hop_length: usize,

    /// Base channel width (default: 32).
    #[serde(default = "default_nout")]
    pub nout: usize,

    /// Recurrent width, split in half per LSTM direction (default: 128).
    #[serde(default = "default_nout_lstm")]
    pub nout_lstm: usize,

    /// Whether the network consumes and produces complex spectrograms.
    #[serde(default)]
    pub is_complex: bool,

    /// Frames trimmed from each end by `predict` / `predict_mask` (default: 64).
    #[serde(default = "default_offset")]
    pub offset: usize,

    /// `(dilation_h, dilation_w)` per atrous ASPP branch.
    #[serde(default = "default_dilations")]
    pub dilations: Vec<(usize, usize)>,

    /// Evaluate the low and high band sub-networks concurrently.
    #[serde(default)]
    pub parallel_bands: bool,
}

fn default_nout() -> usize {
    32
}
fn default_nout_lstm() -> usize {
    128
}
fn default_offset() -> usize {
    64
}
fn default_dilations() -> Vec<(usize, usize)> {
    vec![(4, 2), (8, 4), (12, 6)]
}

/// Spatial size after one stride-2, kernel-3, pad-1 convolution.
fn halved(len: usize) -> usize {
    len.div_ceil(2)
}

impl CascadedNetConfig {
    /// Configuration with default widths for the given STFT parameters.
    pub fn new(n_fft: usize, hop_length: usize) -> Self {
        Self {
            n_fft,
            hop_length,
            nout: default_nout(),
            nout_lstm: default_nout_lstm(),
            is_complex: false,
            offset: default_offset(),
            dilations: default_dilations(),
            parallel_bands: false,
        }
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> SeparationResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> SeparationResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SeparationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Number of frequency bins the network models directly.
    pub fn max_bin(&self) -> usize {
        self.n_fft / 2
    }

    /// Frequency extent of the produced masks.
    pub fn output_bin(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Feature size of the full-band recurrent bottleneck.
    pub fn nin_lstm(&self) -> usize {
        self.max_bin() / 2
    }

    /// Input channels after complex parts are stacked.
    pub fn nin(&self) -> usize {
        if self.is_complex { 4 } else { 2 }
    }

    /// Bins in the low band; the high band gets the rest.
    pub fn low_band_bins(&self) -> usize {
        self.max_bin() / 2
    }

    /// Bins in the high band.
    pub fn high_band_bins(&self) -> usize {
        self.max_bin() - self.low_band_bins()
    }

    /// Check that the channel and band arithmetic yields a consistent network.
    ///
    /// The recurrent bottleneck runs on the output of the second encoder level,
    /// so each band must halve to exactly the LSTM feature size it was built
    /// with.
    pub fn validate(&self) -> SeparationResult<()> {
        let invalid = |msg: String| Err(SeparationError::InvalidConfig(msg));

        if self.n_fft < 4 {
            return invalid(format!("n_fft must be at least 4, got {}", self.n_fft));
        }
        if self.nout < 4 || self.nout % 4 != 0 {
            return invalid(format!(
                "nout must be a positive multiple of 4, got {}",
                self.nout
            ));
        }
        if self.nout_lstm < 4 || self.nout_lstm % 4 != 0 {
            return invalid(format!(
                "nout_lstm must be a positive multiple of 4, got {}",
                self.nout_lstm
            ));
        }
        if self.dilations.is_empty() {
            return invalid("at least one ASPP dilation pair is required".to_string());
        }
        if let Some(&(dh, dw)) = self.dilations.iter().find(|(dh, dw)| *dh == 0 || *dw == 0) {
            return invalid(format!("ASPP dilations must be non-zero, got ({dh}, {dw})"));
        }

        let band_lstm = self.nin_lstm() / 2;
        if band_lstm == 0 {
            return invalid(format!("n_fft {} is too small for band splitting", self.n_fft));
        }
        for (band, bins) in [("low", self.low_band_bins()), ("high", self.high_band_bins())] {
            if halved(bins) != band_lstm {
                return invalid(format!(
                    "{band} band of {bins} bins reaches {} bins at the recurrent stage, expected {band_lstm}",
                    halved(bins)
                ));
            }
        }
        if halved(self.max_bin()) != self.nin_lstm() {
            return invalid(format!(
                "full band of {} bins reaches {} bins at the recurrent stage, expected {}",
                self.max_bin(),
                halved(self.max_bin()),
                self.nin_lstm()
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_sizes() {
        let config = CascadedNetConfig::new(2048, 1024);
        assert_eq!(config.max_bin(), 1024);
        assert_eq!(config.output_bin(), 1025);
        assert_eq!(config.nin_lstm(), 512);
        assert_eq!(config.low_band_bins(), 512);
        assert_eq!(config.high_band_bins(), 512);
        assert_eq!(config.nin(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_defaults() {
        let config = CascadedNetConfig::from_json(r#"{"n_fft": 2048, "hop_length": 1024}"#)
            .expect("valid json");
        assert_eq!(config, CascadedNetConfig::new(2048, 1024));
        assert_eq!(config.dilations, vec![(4, 2), (8, 4), (12, 6)]);
    }

    #[test]
    fn test_from_json_overrides() {
        let json = r#"{
            "n_fft": 1024,
            "hop_length": 256,
            "nout": 16,
            "nout_lstm": 64,
            "is_complex": true,
            "offset": 32,
            "dilations": [[2, 1], [4, 2]]
        }"#;
        let config = CascadedNetConfig::from_json(json).expect("valid json");
        assert_eq!(config.nout, 16);
        assert_eq!(config.nin(), 4);
        assert_eq!(config.offset, 32);
        assert_eq!(config.dilations, vec![(2, 1), (4, 2)]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_n_fft_is_rejected() {
        assert!(CascadedNetConfig::from_json(r#"{"hop_length": 512}"#).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_widths() {
        let mut config = CascadedNetConfig::new(2048, 1024);
        config.nout = 6;
        assert!(matches!(
            config.validate(),
            Err(SeparationError::InvalidConfig(_))
        ));

        let mut config = CascadedNetConfig::new(2048, 1024);
        config.nout_lstm = 2;
        assert!(config.validate().is_err());

        let mut config = CascadedNetConfig::new(2048, 1024);
        config.dilations.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_misaligned_bands() {
        // max_bin = 50: bands of 25 bins halve to 13, but the band LSTM expects 12.
        let config = CascadedNetConfig::new(100, 25);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("recurrent stage"), "{err}");
    }
}
