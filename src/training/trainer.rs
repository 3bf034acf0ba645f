//! Alternating Training Loop
//!
//! Drives SGD over epochs while popping the reassignment schedule: whenever
//! the global optimization progress crosses the next threshold, training
//! pauses, every pseudo-label is recomputed through the balancing solver,
//! and the epoch continues against the fresh assignment. Crash recovery is
//! checkpoint-based at epoch granularity; per-batch failures are fatal.

use std::path::PathBuf;
use std::time::Instant;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig};
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Int, Tensor, TensorData};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::dataset::{SelfLabelBatcher, SelfLabelDataset};
use crate::model::config::{ModelConfig, TrainConfig};
use crate::model::SelfLabelNet;
use crate::training::assignment::AssignmentUpdater;
use crate::training::checkpoint::{CheckpointRole, CheckpointStore, LoadOutcome};
use crate::training::labels::LabelAssignment;
use crate::training::schedule::ReassignmentSchedule;
use crate::training::scheduler::learning_rate;
use crate::utils::error::{Result, SelfLabelError};
use crate::utils::metrics::{AverageMeter, MetricsSink};

/// Build the SGD optimizer for a run configuration
pub fn build_optimizer<B: AutodiffBackend>(
    config: &TrainConfig,
) -> impl Optimizer<SelfLabelNet<B>, B> {
    SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(config.momentum as _)
                .with_dampening(0.0),
        ))
        .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay as _)))
        .init()
}

/// Per-epoch training outcome
#[derive(Debug, Clone)]
pub struct EpochStats {
    /// Batch-size-weighted average loss over the epoch
    pub average_loss: f64,
}

/// Summary of a completed run
#[derive(Debug, Clone)]
pub struct TrainReport {
    /// Epochs executed by this process (excludes epochs restored from
    /// checkpoint)
    pub epochs_completed: usize,
    /// Reassignment events that fired
    pub reassignments: usize,
    /// Global step at which each event fired
    pub reassignment_steps: Vec<usize>,
    /// Lowest average epoch loss seen
    pub lowest_loss: f64,
    /// Where the final model artifact was written
    pub final_model_path: PathBuf,
}

/// Orchestrates the alternating optimization run.
///
/// Owns the model, optimizer, pseudo-label store, and reassignment schedule;
/// everything is driven from a single control thread. Construction resumes
/// from the run directory's `latest` checkpoint when the configuration asks
/// for it.
pub struct Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<SelfLabelNet<B>, B>,
{
    train_config: TrainConfig,
    model: SelfLabelNet<B>,
    optimizer: O,
    labels: LabelAssignment,
    schedule: ReassignmentSchedule,
    updater: AssignmentUpdater<B>,
    checkpoints: CheckpointStore,
    sink: Box<dyn MetricsSink>,
    dataset: SelfLabelDataset,
    batcher: SelfLabelBatcher<B>,
    device: B::Device,
    rng: ChaCha8Rng,
    first_epoch: usize,
    lowest_loss: f64,
    reassignment_steps: Vec<usize>,
}

impl<B, O> Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<SelfLabelNet<B>, B>,
{
    /// Assemble a run: validate configuration, compute the full schedule,
    /// and either restore the latest checkpoint or initialize fresh labels.
    pub fn new(
        train_config: TrainConfig,
        model_config: &ModelConfig,
        dataset: SelfLabelDataset,
        model: SelfLabelNet<B>,
        optimizer: O,
        updater: AssignmentUpdater<B>,
        sink: Box<dyn MetricsSink>,
        device: B::Device,
    ) -> Result<Self> {
        train_config.validate()?;
        model_config.validate()?;

        let n = dataset.len();
        if n == 0 {
            return Err(SelfLabelError::Dataset(
                "training dataset is empty".to_string(),
            ));
        }
        if dataset.image_size() != model_config.input_size {
            return Err(SelfLabelError::Config(format!(
                "dataset image size {} does not match model input size {}",
                dataset.image_size(),
                model_config.input_size
            )));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(train_config.seed);
        let fresh_labels = LabelAssignment::initialize(
            model_config.num_heads,
            n,
            model_config.clusters_per_head,
            &mut rng,
        );
        let mut schedule =
            ReassignmentSchedule::compute(train_config.epochs, n, train_config.num_events);
        let checkpoints = CheckpointStore::new(train_config.run_dir.clone());
        let batcher = SelfLabelBatcher::new(dataset.image_size(), dataset.channels());

        let (model, optimizer, labels, first_epoch, lowest_loss) = if train_config.resume {
            match checkpoints.load(model, optimizer, &device)? {
                LoadOutcome::Restored(state) => {
                    state.labels.validate_shape(
                        model_config.num_heads,
                        n,
                        model_config.clusters_per_head,
                    )?;
                    schedule.resume_filter(state.resume_epoch, n);
                    info!("Resuming training at epoch {}", state.resume_epoch);
                    (
                        state.model,
                        state.optimizer,
                        state.labels,
                        state.resume_epoch,
                        state.lowest_loss,
                    )
                }
                LoadOutcome::Fresh { model, optimizer } => {
                    (model, optimizer, fresh_labels, 0, f64::INFINITY)
                }
            }
        } else {
            (model, optimizer, fresh_labels, 0, f64::INFINITY)
        };

        Ok(Self {
            train_config,
            model,
            optimizer,
            labels,
            schedule,
            updater,
            checkpoints,
            sink,
            dataset,
            batcher,
            device,
            rng,
            first_epoch,
            lowest_loss,
            reassignment_steps: Vec::new(),
        })
    }

    /// Perform the full optimization.
    ///
    /// Runs epochs `first_epoch..=epochs`, writing the `lowest` checkpoint
    /// whenever an epoch improves on the best loss, and persists the final
    /// model artifact on completion.
    pub fn run(&mut self) -> Result<TrainReport> {
        let n = self.dataset.len();
        info!(
            "Will reassign labels at epochs {:?}",
            self.schedule
                .pending_epochs(n)
                .iter()
                .map(|e| (e * 100.0).round() / 100.0)
                .collect::<Vec<_>>()
        );

        let mut epoch = self.first_epoch;
        while epoch <= self.train_config.epochs {
            let stats = self.train_on_epoch(epoch)?;

            if stats.average_loss < self.lowest_loss {
                self.lowest_loss = stats.average_loss;
                self.checkpoints.save(
                    &self.model,
                    &self.optimizer,
                    &self.labels,
                    epoch,
                    self.lowest_loss,
                    &CheckpointRole::Lowest,
                )?;
                info!("New lowest epoch loss: {:.4}", self.lowest_loss);
            }

            epoch += 1;
        }

        let final_model_path = self.train_config.final_model_path();
        self.checkpoints.save_model(&self.model, &final_model_path)?;
        info!("Optimization completed; model saved to {:?}", final_model_path);

        Ok(TrainReport {
            epochs_completed: (self.train_config.epochs + 1).saturating_sub(self.first_epoch),
            reassignments: self.reassignment_steps.len(),
            reassignment_steps: self.reassignment_steps.clone(),
            lowest_loss: self.lowest_loss,
            final_model_path,
        })
    }

    /// One pass over the training data.
    fn train_on_epoch(&mut self, epoch: usize) -> Result<EpochStats> {
        let base_lr = self.train_config.base_lr;
        let drop_interval = self.train_config.lr_drop_interval;
        let batch_size = self.train_config.batch_size;

        let lr = learning_rate(epoch, base_lr, drop_interval);
        if learning_rate(epoch + 1, base_lr, drop_interval) != lr {
            // Preserve the exact parameter state before the drop takes effect.
            self.checkpoints.save(
                &self.model,
                &self.optimizer,
                &self.labels,
                epoch,
                self.lowest_loss,
                &CheckpointRole::Tagged("pre-lr-drop".to_string()),
            )?;
            info!("Learning rate drops after epoch {}; pre-lr-drop checkpoint written", epoch);
        }

        info!(
            "Starting epoch {}/{} (lr {:.6})",
            epoch, self.train_config.epochs, lr
        );

        let n = self.dataset.len();
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut self.rng);
        let batches_per_epoch = (n + batch_size - 1) / batch_size;

        let mut meter = AverageMeter::new();
        let criterion = CrossEntropyLossConfig::new().init(&self.device);

        for (batch_idx, chunk) in indices.chunks(batch_size).enumerate() {
            let global_step = epoch * batches_per_epoch + batch_idx;

            if self.schedule.is_due(global_step, batch_size) {
                let threshold = self.schedule.pop()?;
                info!(
                    "Label reassignment at global step {} (threshold {:.0})",
                    global_step, threshold
                );
                self.model.single_head = true;
                let outcome =
                    self.updater
                        .update(&self.model, &self.dataset, &mut self.labels, batch_size);
                self.model.single_head = false;
                outcome?;
                self.reassignment_steps.push(global_step);
            }

            let items: Vec<_> = chunk.iter().filter_map(|&i| self.dataset.get(i)).collect();
            if items.is_empty() {
                continue;
            }

            let start_tm = Instant::now();
            let batch = self.batcher.batch(items, &self.device);
            let mass = batch.indices.len();

            let outputs = self.model.forward(batch.images);
            let loss = self.batch_loss(&criterion, outputs, &batch.indices);
            let loss_value: f64 = loss.clone().into_scalar().elem();

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &self.model);
            self.model = self.optimizer.step(lr, self.model.clone(), grads);

            meter.update(loss_value, mass);

            if batch_idx % self.train_config.log_iter == 0 {
                let elapsed = start_tm.elapsed().as_secs_f64();
                self.sink.scalar("lr", lr, global_step);
                self.sink.scalar("loss", loss_value, global_step);
                if elapsed > 0.0 {
                    self.sink
                        .scalar("examples_per_sec", mass as f64 / elapsed, global_step);
                }
                debug!("step {}: loss {:.4}", global_step, loss_value);
            }
        }

        if epoch % self.train_config.log_intv == 0 {
            for (name, value) in self.model.parameter_summary() {
                self.sink.scalar(&format!("weights/{}", name), value, epoch);
            }
        }

        self.checkpoints.save(
            &self.model,
            &self.optimizer,
            &self.labels,
            epoch,
            self.lowest_loss,
            &CheckpointRole::Latest,
        )?;

        info!("Epoch {} completed: average loss {:.4}", epoch, meter.average);
        Ok(EpochStats {
            average_loss: meter.average,
        })
    }

    /// Cross-entropy against the pseudo-labels, averaged across heads.
    fn batch_loss(
        &self,
        criterion: &CrossEntropyLoss<B>,
        outputs: Vec<Tensor<B, 2>>,
        indices: &[usize],
    ) -> Tensor<B, 1> {
        let num_heads = outputs.len();
        let count = indices.len();

        let mut total = Tensor::<B, 1>::zeros([1], &self.device);
        for (head, logits) in outputs.into_iter().enumerate() {
            let targets = self.labels.targets_for(head, indices);
            let targets =
                Tensor::<B, 1, Int>::from_data(TensorData::new(targets, [count]), &self.device);
            total = total + criterion.forward(logits, targets);
        }
        total.div_scalar(num_heads as f64)
    }

    /// Current pseudo-label assignment
    pub fn labels(&self) -> &LabelAssignment {
        &self.labels
    }

    /// Current model
    pub fn model(&self) -> &SelfLabelNet<B> {
        &self.model
    }

    /// Consume the trainer and take the trained model
    pub fn into_model(self) -> SelfLabelNet<B> {
        self.model
    }

    /// First epoch this process will run (non-zero after a resume)
    pub fn first_epoch(&self) -> usize {
        self.first_epoch
    }

    /// Reassignment events still pending
    pub fn pending_events(&self) -> usize {
        self.schedule.remaining_events()
    }
}
