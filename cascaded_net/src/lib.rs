//! Cascaded band-split network for music source separation.
//!
//! Given a magnitude or complex spectrogram of a mix, [`CascadedNet`] predicts
//! a soft mask for the target source (`y`) and one for the residual (`v`).
//! The network splits the spectrum into a low and a high band, refines each
//! band over two stages and fuses everything in a final full-band stage.
//!
//! Spectrogram transforms, audio I/O and training are left to the caller.

pub mod config;
pub mod error;
pub mod model;
pub mod nn;

pub use config::CascadedNetConfig;
pub use error::{SeparationError, SeparationResult};
pub use model::{
    CascadedNet, Masks, Separated,
    loader::ModelLoader,
    spectrogram::{ComplexTensor, SpectralTensor},
};
