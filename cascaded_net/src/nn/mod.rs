//! Neural network building blocks.
//!
//! Leaves first:
//! - [`conv_block::ConvBlock`]: conv + batch norm + activation
//! - [`encoder::Encoder`] / [`decoder::Decoder`]: down/upsampling stages
//! - [`aspp::AsppModule`]: atrous pyramid at the bottleneck
//! - [`lstm_module::LstmModule`]: bidirectional recurrent bottleneck
//! - [`base_net::BaseNet`]: the U-shaped sub-network built from all of the above

pub mod aspp;
pub mod base_net;
pub mod conv_block;
pub mod decoder;
pub mod dropout;
pub mod encoder;
pub mod lstm_module;
pub mod ops;
