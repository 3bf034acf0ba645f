//! Model and Run Configuration Module
//!
//! Defines configuration structures for the multi-head network architecture
//! and the training run. Both are built once (typically from the CLI) and
//! passed by reference into the trainer, epoch loop, and assignment updater;
//! there is no ambient global configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, SelfLabelError};

/// Configuration for the multi-head classifier network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of independent classification heads
    pub num_heads: usize,

    /// Number of clusters (pseudo-classes) per head
    pub clusters_per_head: usize,

    /// Input image size (width and height, assumed square)
    pub input_size: usize,

    /// Number of input channels (3 for RGB)
    pub in_channels: usize,

    /// Base number of convolutional filters
    pub base_filters: usize,

    /// Width of the embedding layer feeding the heads
    pub embed_dim: usize,

    /// Dropout rate before the heads (0.0 to 1.0)
    pub dropout_rate: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_heads: 1,
            clusters_per_head: 3000,
            input_size: 64,
            in_channels: 3,
            base_filters: 32,
            embed_dim: 256,
            dropout_rate: 0.3,
        }
    }
}

impl ModelConfig {
    /// Create a configuration with the given head layout
    pub fn new(num_heads: usize, clusters_per_head: usize) -> Self {
        Self {
            num_heads,
            clusters_per_head,
            ..Default::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_heads == 0 {
            return Err(SelfLabelError::Config(
                "num_heads must be greater than 0".to_string(),
            ));
        }
        if self.clusters_per_head < 2 {
            return Err(SelfLabelError::Config(
                "clusters_per_head must be at least 2".to_string(),
            ));
        }
        // The trunk halves spatial resolution three times.
        if self.input_size == 0 || self.input_size % 8 != 0 {
            return Err(SelfLabelError::Config(
                "input_size must be a positive multiple of 8".to_string(),
            ));
        }
        if self.dropout_rate < 0.0 || self.dropout_rate >= 1.0 {
            return Err(SelfLabelError::Config(
                "dropout_rate must be in range [0.0, 1.0)".to_string(),
            ));
        }
        if self.base_filters == 0 || self.embed_dim == 0 {
            return Err(SelfLabelError::Config(
                "base_filters and embed_dim must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Numeric precision used by the host assignment solver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    /// f64 accumulation (default)
    Full,
    /// f32 accumulation for reduced-resource environments
    Reduced,
}

impl Default for Precision {
    fn default() -> Self {
        Self::Full
    }
}

/// Training run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Number of training epochs; the run covers epochs `0..=epochs`
    pub epochs: usize,

    /// Batch size for training and for the reassignment forward pass
    pub batch_size: usize,

    /// Initial learning rate
    pub base_lr: f64,

    /// Divide the learning rate by 10 every this many epochs
    pub lr_drop_interval: usize,

    /// SGD momentum
    pub momentum: f64,

    /// Weight decay (L2 regularization)
    pub weight_decay: f32,

    /// Number of pseudo-label reassignment events over the run
    pub num_events: usize,

    /// Sharpening exponent lambda for the balancing solver
    pub lambda: f64,

    /// Iteration cap for the balancing solver
    pub sk_iterations: usize,

    /// Marginal-residual tolerance for the balancing solver
    pub sk_tolerance: f64,

    /// Numeric precision for the host solver
    pub sk_precision: Precision,

    /// Emit scalar metrics every this many batches
    pub log_iter: usize,

    /// Emit the parameter summary every this many epochs
    pub log_intv: usize,

    /// Random seed for label initialization and epoch shuffling
    pub seed: u64,

    /// Run directory holding checkpoints and the final model
    pub run_dir: PathBuf,

    /// Whether to resume from an existing checkpoint in `run_dir`
    pub resume: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 200,
            batch_size: 256,
            base_lr: 0.08,
            lr_drop_interval: 150,
            momentum: 0.9,
            weight_decay: 1e-5,
            num_events: 100,
            lambda: 25.0,
            sk_iterations: 100,
            sk_tolerance: 1e-3,
            sk_precision: Precision::Full,
            log_iter: 200,
            log_intv: 1,
            seed: 42,
            run_dir: PathBuf::from("output/self-label-default"),
            resume: true,
        }
    }
}

impl TrainConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SelfLabelError::Config(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if self.num_events == 0 {
            return Err(SelfLabelError::Config(
                "num_events must be greater than 0".to_string(),
            ));
        }
        if self.base_lr <= 0.0 {
            return Err(SelfLabelError::Config(
                "base_lr must be positive".to_string(),
            ));
        }
        if self.lr_drop_interval == 0 {
            return Err(SelfLabelError::Config(
                "lr_drop_interval must be greater than 0".to_string(),
            ));
        }
        if self.lambda <= 0.0 {
            return Err(SelfLabelError::Config(
                "lambda must be positive".to_string(),
            ));
        }
        if self.log_iter == 0 || self.log_intv == 0 {
            return Err(SelfLabelError::Config(
                "log_iter and log_intv must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the final model artifact inside the run directory
    pub fn final_model_path(&self) -> PathBuf {
        self.run_dir.join("model_final")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_config_default_is_valid() {
        assert!(ModelConfig::default().validate().is_ok());
    }

    #[test]
    fn test_model_config_rejects_zero_heads() {
        let mut config = ModelConfig::default();
        config.num_heads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_model_config_rejects_bad_input_size() {
        let mut config = ModelConfig::default();
        config.input_size = 100; // not a multiple of 8
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_train_config_default_is_valid() {
        assert!(TrainConfig::default().validate().is_ok());
    }

    #[test]
    fn test_train_config_rejects_zero_events() {
        let mut config = TrainConfig::default();
        config.num_events = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_final_model_path() {
        let config = TrainConfig {
            run_dir: PathBuf::from("runs/a"),
            ..Default::default()
        };
        assert_eq!(config.final_model_path(), PathBuf::from("runs/a/model_final"));
    }
}
