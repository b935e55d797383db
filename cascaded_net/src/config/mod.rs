//! Network configuration.

pub mod net_config;

pub use net_config::CascadedNetConfig;
