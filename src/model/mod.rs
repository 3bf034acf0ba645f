//! Network architecture and configuration.

pub mod cnn;
pub mod config;

pub use cnn::SelfLabelNet;
pub use config::{ModelConfig, Precision, TrainConfig};
