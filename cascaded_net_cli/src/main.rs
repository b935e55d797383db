//! Command-line driver for CascadedNet.
//!
//! # Usage
//!
//! ```bash
//! # Random weights, default 2048-point configuration
//! cascaded-net --frames 256
//!
//! # Small complex network, masked + trimmed output
//! cascaded-net --n-fft 512 --nout 16 --nout-lstm 64 --complex --predict
//!
//! # Trained weights (config.json + model.safetensors)
//! cascaded-net --model-path /path/to/model --device cuda --tracing
//! ```

mod args;

use std::time::Instant;

use anyhow::{Context, Result, bail};
use candle_core::{DType, Device, Tensor};
use cascaded_net::{
    CascadedNet, CascadedNetConfig, ComplexTensor, ModelLoader, SpectralTensor,
};
use clap::Parser;

use args::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber if --tracing flag is passed
    if cli.tracing {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .init();
    }

    let device = parse_device(&cli.device)?;
    let mut dtype = match cli.dtype.as_str() {
        "f32" | "float32" => DType::F32,
        "f16" | "float16" | "half" => DType::F16,
        "bf16" | "bfloat16" => DType::BF16,
        other => bail!("Unknown dtype: {}. Use f32, f16, or bf16", other),
    };

    // CPU doesn't support half-precision convolutions in Candle, fall back to F32
    if matches!(device, Device::Cpu) && matches!(dtype, DType::BF16 | DType::F16) {
        tracing::warn!(
            requested_dtype = %cli.dtype,
            "CPU does not support requested dtype, using F32 instead"
        );
        dtype = DType::F32;
    }

    let net = build_net(&cli, &device, dtype)?;
    let config = net.config().clone();

    tracing::info!(
        n_fft = config.n_fft,
        hop_length = config.hop_length,
        nout = config.nout,
        nout_lstm = config.nout_lstm,
        is_complex = config.is_complex,
        parallel_bands = config.parallel_bands,
        device = ?device,
        dtype = ?dtype,
        "Network configuration"
    );

    let input = synthetic_input(&config, cli.batch, cli.frames, &device, dtype)?;
    println!("Input:  {} {:?}", input.kind(), input.dims());

    let start = Instant::now();
    let (y, v) = if cli.predict {
        let separated = net.predict(&input).context("predict failed")?;
        (separated.y, separated.v)
    } else {
        let masks = net.forward(&input).context("forward pass failed")?;
        (masks.y, masks.v)
    };
    let elapsed = start.elapsed();

    for (label, out) in [("y", &y), ("v", &v)] {
        let (min, max) = magnitude_range(out)?;
        println!(
            "{label}:      {} {:?} |x| in [{min:.4}, {max:.4}]",
            out.kind(),
            out.dims()
        );
    }
    println!("Elapsed: {:.2?}", elapsed);

    Ok(())
}

fn parse_device(device: &str) -> Result<Device> {
    let device = match device {
        "cpu" => Device::Cpu,
        "cuda" | "cuda:0" => {
            #[cfg(feature = "cuda")]
            {
                Device::new_cuda(0)?
            }
            #[cfg(not(feature = "cuda"))]
            {
                bail!("CUDA support not compiled. Rebuild with --features cuda")
            }
        }
        "metal" => {
            #[cfg(feature = "metal")]
            {
                Device::new_metal(0)?
            }
            #[cfg(not(feature = "metal"))]
            {
                bail!("Metal support not compiled. Rebuild with --features metal")
            }
        }
        other => bail!("Unknown device: {}. Use cpu, cuda, or metal", other),
    };
    Ok(device)
}

fn build_net(cli: &Cli, device: &Device, dtype: DType) -> Result<CascadedNet> {
    if let Some(model_path) = &cli.model_path {
        let mut loader = ModelLoader::from_local_dir(model_path).with_context(|| {
            format!("Failed to read model config from {}", model_path.display())
        })?;
        if cli.parallel_bands {
            loader.set_parallel_bands(true);
        }
        println!("Loading weights from {}", loader.weights_path().display());
        return loader
            .load(device, dtype)
            .context("Failed to load model weights");
    }

    let mut config = match &cli.config {
        Some(path) => CascadedNetConfig::from_file(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => CascadedNetConfig::new(cli.n_fft, cli.hop_length),
    };
    if let Some(nout) = cli.nout {
        config.nout = nout;
    }
    if let Some(nout_lstm) = cli.nout_lstm {
        config.nout_lstm = nout_lstm;
    }
    config.is_complex |= cli.complex;
    config.parallel_bands |= cli.parallel_bands;

    println!("Initialising random weights");
    let (net, _varmap) = CascadedNet::init_random(&config, device, dtype)?;
    Ok(net)
}

/// Random spectrogram of shape (batch, 2, output_bin, frames).
fn synthetic_input(
    config: &CascadedNetConfig,
    batch: usize,
    frames: usize,
    device: &Device,
    dtype: DType,
) -> Result<SpectralTensor> {
    let shape = (batch, 2, config.output_bin(), frames);
    let input = if config.is_complex {
        SpectralTensor::from(ComplexTensor::new(
            Tensor::randn(0f32, 1.0, shape, device)?,
            Tensor::randn(0f32, 1.0, shape, device)?,
        )?)
    } else {
        SpectralTensor::from(Tensor::rand(0f32, 1.0, shape, device)?)
    };
    Ok(input.to_dtype(dtype)?)
}

/// Smallest and largest elementwise magnitude.
fn magnitude_range(xs: &SpectralTensor) -> Result<(f32, f32)> {
    let magnitude = match xs {
        SpectralTensor::Real(xs) => xs.abs()?,
        SpectralTensor::Complex(xs) => xs.abs()?,
    };
    let magnitude = magnitude.to_dtype(DType::F32)?;
    Ok((
        magnitude.min_all()?.to_scalar::<f32>()?,
        magnitude.max_all()?.to_scalar::<f32>()?,
    ))
}
