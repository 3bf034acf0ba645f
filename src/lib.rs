//! # selflabel
//!
//! Self-supervised visual representation learning by self-labelling, built
//! on the Burn framework. Training alternates between standard SGD over a
//! multi-head CNN and discrete pseudo-label reassignment: on an irregular,
//! data-size-dependent schedule the entire label matrix is recomputed by a
//! Sinkhorn-Knopp balancing solver, keeping every head's cluster sizes
//! approximately uniform.
//!
//! ## Modules
//!
//! - `training`: the alternating trainer, label store, reassignment
//!   schedule, balancing solver, and checkpointing
//! - `model`: multi-head CNN and run configuration
//! - `dataset`: image-folder loading, caching, and batching
//! - `backend`: compile-time backend selection (CUDA or NdArray)
//! - `utils`: logging, metrics, and error types

pub mod backend;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use backend::{default_device, DefaultBackend, DeviceCapability, TrainingBackend};
pub use dataset::{ImageFolderDataset, SelfLabelBatch, SelfLabelBatcher, SelfLabelDataset};
pub use model::{ModelConfig, Precision, SelfLabelNet, TrainConfig};
pub use training::{
    build_optimizer, AssignmentUpdater, CheckpointStore, LabelAssignment, ReassignmentSchedule,
    SinkhornConfig, Trainer, TrainReport,
};
pub use utils::error::{Result, SelfLabelError};
pub use utils::metrics::{AverageMeter, LogMetrics, MetricsSink, NullMetrics};

/// Default number of training epochs
pub const DEFAULT_EPOCHS: usize = 200;

/// Default number of label reassignment events per run
pub const DEFAULT_NUM_EVENTS: usize = 100;

/// Default number of clusters per head
pub const DEFAULT_CLUSTERS_PER_HEAD: usize = 3000;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
