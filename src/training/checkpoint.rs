//! Checkpoint Store
//!
//! Persists and restores the full training state: model record, optimizer
//! record, pseudo-label matrix, and a small state manifest. Three slots
//! exist per run: `latest` (written unconditionally at every epoch end),
//! `lowest` (written when the epoch loss is the best seen), and ad hoc
//! tagged slots such as `pre-lr-drop`. Only `latest` is read on resume.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::optim::Optimizer;
use burn::record::{CompactRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::SelfLabelNet;
use crate::training::labels::LabelAssignment;
use crate::utils::error::{Result, SelfLabelError};

/// Which slot a checkpoint is written to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointRole {
    /// Unconditional end-of-epoch checkpoint; the resume source
    Latest,
    /// Best-loss-so-far checkpoint
    Lowest,
    /// Ad hoc tagged snapshot, e.g. "pre-lr-drop"
    Tagged(String),
}

impl CheckpointRole {
    fn stem(&self) -> &str {
        match self {
            CheckpointRole::Latest => "latest",
            CheckpointRole::Lowest => "lowest",
            CheckpointRole::Tagged(tag) => tag.as_str(),
        }
    }
}

/// Manifest persisted alongside the records
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateManifest {
    /// Last fully completed epoch
    epoch: usize,
    /// Lowest average epoch loss seen so far
    lowest_loss: f64,
}

/// Training state restored from the `latest` slot
pub struct RestoredState<B: AutodiffBackend, O> {
    pub model: SelfLabelNet<B>,
    pub optimizer: O,
    pub labels: LabelAssignment,
    /// First epoch to run after the restore
    pub resume_epoch: usize,
    pub lowest_loss: f64,
}

/// Result of attempting to restore a run
pub enum LoadOutcome<B: AutodiffBackend, O> {
    /// No checkpoint present; the given state is handed back untouched
    Fresh {
        model: SelfLabelNet<B>,
        optimizer: O,
    },
    /// State restored from the `latest` slot
    Restored(RestoredState<B, O>),
}

/// File-system backed checkpoint store for one run directory
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store rooted at the given directory
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// The run directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn model_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("model_{}", stem))
    }

    fn optim_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("optim_{}", stem))
    }

    fn labels_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("labels_{}.json", stem))
    }

    fn state_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("state_{}.json", stem))
    }

    /// Write a complete checkpoint into the given slot.
    ///
    /// `epoch` is the last fully completed epoch; a checkpoint is only ever
    /// written after the epoch's training step has finished.
    pub fn save<B, O>(
        &self,
        model: &SelfLabelNet<B>,
        optimizer: &O,
        labels: &LabelAssignment,
        epoch: usize,
        lowest_loss: f64,
        role: &CheckpointRole,
    ) -> Result<()>
    where
        B: AutodiffBackend,
        O: Optimizer<SelfLabelNet<B>, B>,
    {
        fs::create_dir_all(&self.dir)?;
        let stem = role.stem();
        let recorder = CompactRecorder::new();

        model
            .clone()
            .save_file(self.model_path(stem), &recorder)
            .map_err(|e| SelfLabelError::Checkpoint(format!("failed to save model: {:?}", e)))?;

        recorder
            .record(optimizer.to_record(), self.optim_path(stem))
            .map_err(|e| {
                SelfLabelError::Checkpoint(format!("failed to save optimizer state: {:?}", e))
            })?;

        fs::write(self.labels_path(stem), serde_json::to_string(labels)?)?;
        fs::write(
            self.state_path(stem),
            serde_json::to_string_pretty(&StateManifest { epoch, lowest_loss })?,
        )?;

        debug!("checkpoint '{}' written at epoch {}", stem, epoch);
        Ok(())
    }

    /// Restore the `latest` slot, if present.
    ///
    /// Silently yields [`LoadOutcome::Fresh`] when the run directory or
    /// manifest is absent (a fresh run); any other failure while reading an
    /// existing checkpoint is an error.
    pub fn load<B, O>(
        &self,
        model: SelfLabelNet<B>,
        optimizer: O,
        device: &B::Device,
    ) -> Result<LoadOutcome<B, O>>
    where
        B: AutodiffBackend,
        O: Optimizer<SelfLabelNet<B>, B>,
    {
        let stem = CheckpointRole::Latest.stem();
        let state_path = self.state_path(stem);
        if !state_path.exists() {
            return Ok(LoadOutcome::Fresh { model, optimizer });
        }

        let manifest: StateManifest = serde_json::from_str(&fs::read_to_string(state_path)?)?;
        let recorder = CompactRecorder::new();

        let model = model
            .load_file(self.model_path(stem), &recorder, device)
            .map_err(|e| SelfLabelError::Checkpoint(format!("failed to load model: {:?}", e)))?;

        let record: O::Record = recorder.load(self.optim_path(stem), device).map_err(|e| {
            SelfLabelError::Checkpoint(format!("failed to load optimizer state: {:?}", e))
        })?;
        let optimizer = optimizer.load_record(record);

        let labels: LabelAssignment =
            serde_json::from_str(&fs::read_to_string(self.labels_path(stem))?)?;

        info!(
            "Restored checkpoint (completed epoch {}, lowest loss {:.4})",
            manifest.epoch, manifest.lowest_loss
        );

        Ok(LoadOutcome::Restored(RestoredState {
            model,
            optimizer,
            labels,
            resume_epoch: manifest.epoch + 1,
            lowest_loss: manifest.lowest_loss,
        }))
    }

    /// Persist the final model artifact to an explicit path
    pub fn save_model<B: AutodiffBackend>(
        &self,
        model: &SelfLabelNet<B>,
        path: &Path,
    ) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        model
            .clone()
            .save_file(path, &CompactRecorder::new())
            .map_err(|e| {
                SelfLabelError::Checkpoint(format!("failed to save final model: {:?}", e))
            })
    }
}
