use clap::Parser;
use std::path::PathBuf;

/// CascadedNet command line interface
///
/// Builds a separation network from a configuration (and optionally trained
/// weights), runs it on a synthetic spectrogram and reports the mask shapes
/// and value ranges.
#[derive(Parser, Debug)]
#[command(name = "cascaded-net")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a config.json for a randomly initialised network
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Model directory containing config.json and model.safetensors
    #[arg(short = 'p', long, conflicts_with = "config")]
    pub model_path: Option<PathBuf>,

    /// STFT size, used when neither --config nor --model-path is given
    #[arg(long, default_value = "2048")]
    pub n_fft: usize,

    /// STFT hop, used when neither --config nor --model-path is given
    #[arg(long, default_value = "1024")]
    pub hop_length: usize,

    /// Override the base channel width
    #[arg(long)]
    pub nout: Option<usize>,

    /// Override the recurrent width
    #[arg(long)]
    pub nout_lstm: Option<usize>,

    /// Build a complex-spectrogram network
    #[arg(long)]
    pub complex: bool,

    /// Number of time frames in the synthetic input
    #[arg(long, default_value = "256")]
    pub frames: usize,

    /// Batch size of the synthetic input
    #[arg(long, default_value = "1")]
    pub batch: usize,

    /// Device to use (cpu, cuda, metal)
    #[arg(long, default_value = "cpu")]
    pub device: String,

    /// Data type (f32, f16, bf16)
    #[arg(long, default_value = "f32")]
    pub dtype: String,

    /// Evaluate low and high band sub-networks concurrently
    #[arg(long)]
    pub parallel_bands: bool,

    /// Run predict (masked, trimmed input) instead of a plain forward pass
    #[arg(long)]
    pub predict: bool,

    /// Enable tracing output (filter with RUST_LOG)
    #[arg(long)]
    pub tracing: bool,
}
