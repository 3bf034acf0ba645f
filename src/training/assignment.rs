//! Assignment Updater
//!
//! Refreshes the entire pseudo-label store by running the balancing solver on
//! fresh model outputs. The solver variant (device tensor ops vs host loops)
//! and the numeric mode are fixed at construction from the probed device
//! capability and the run configuration, never queried ad hoc.

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::tensor::activation::softmax;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Tensor, TensorData};
use tracing::debug;

use crate::backend::DeviceCapability;
use crate::dataset::{SelfLabelBatcher, SelfLabelDataset};
use crate::model::SelfLabelNet;
use crate::training::labels::LabelAssignment;
use crate::training::sinkhorn::{
    AssignmentSolver, DeviceSinkhorn, HostSinkhorn, SinkhornConfig,
};
use crate::utils::error::{Result, SelfLabelError};

/// Recomputes the label store from model outputs via the balancing solver
pub struct AssignmentUpdater<B: AutodiffBackend> {
    solver: Box<dyn AssignmentSolver<B::InnerBackend>>,
    config: SinkhornConfig,
}

impl<B: AutodiffBackend> AssignmentUpdater<B> {
    /// Select the solver variant for the given capability.
    ///
    /// `Accelerated` picks the device-tensor solver, `HostOnly` the
    /// host-precision solver.
    pub fn new(capability: DeviceCapability, config: SinkhornConfig) -> Self {
        let solver: Box<dyn AssignmentSolver<B::InnerBackend>> = match capability {
            DeviceCapability::Accelerated => Box::new(DeviceSinkhorn),
            DeviceCapability::HostOnly => Box::new(HostSinkhorn),
        };
        Self { solver, config }
    }

    /// Name of the selected solver variant
    pub fn solver_name(&self) -> &'static str {
        self.solver.name()
    }

    /// Recompute every head's labels in place.
    ///
    /// Runs one fresh full-dataset forward pass in eval mode to collect the
    /// shared representation, then per head projects, softmaxes, balances,
    /// and replaces that head's row. Each head's probability matrix is
    /// dropped before the next head is processed to bound peak memory. Any
    /// solver failure propagates before the head's row is touched, so the
    /// store never holds a partial assignment.
    pub fn update(
        &self,
        model: &SelfLabelNet<B>,
        dataset: &SelfLabelDataset,
        labels: &mut LabelAssignment,
        batch_size: usize,
    ) -> Result<()> {
        let device = <B::InnerBackend as Backend>::Device::default();
        let eval_model = model.clone().valid();
        let n = dataset.len();

        if n == 0 {
            return Err(SelfLabelError::Dataset(
                "cannot reassign labels over an empty dataset".to_string(),
            ));
        }
        labels.validate_shape(eval_model.num_heads(), n, eval_model.clusters_per_head())?;

        let batcher =
            SelfLabelBatcher::<B::InnerBackend>::new(dataset.image_size(), dataset.channels());
        let embed_dim = eval_model.embed_dim();

        // One pass over the data; example i lands in row i.
        let mut features = Vec::with_capacity(n * embed_dim);
        for start in (0..n).step_by(batch_size) {
            let end = (start + batch_size).min(n);
            let items: Vec<_> = (start..end).filter_map(|i| dataset.get(i)).collect();
            if items.len() != end - start {
                return Err(SelfLabelError::Dataset(format!(
                    "dataset failed to produce examples {}..{}",
                    start, end
                )));
            }

            let batch = batcher.batch(items, &device);
            let chunk = eval_model.forward_features(batch.images);
            let mut chunk: Vec<f32> = chunk
                .into_data()
                .to_vec()
                .map_err(|e| SelfLabelError::Solver(format!("failed to read features: {:?}", e)))?;
            features.append(&mut chunk);
        }

        let features = Tensor::<B::InnerBackend, 2>::from_data(
            TensorData::new(features, [n, embed_dim]),
            &device,
        );

        for head in 0..eval_model.num_heads() {
            let logits = eval_model.head_logits(head, features.clone());
            let probabilities = softmax(logits, 1);
            let row = self.solver.balance(probabilities, &self.config)?;
            labels.set_row(head, row)?;
            debug!("head {}: labels reassigned", head);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::ModelConfig;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    type TestBackend = Autodiff<NdArray>;

    fn setup(
        n: usize,
        heads: usize,
        clusters: usize,
    ) -> (SelfLabelNet<TestBackend>, SelfLabelDataset, LabelAssignment) {
        let config = ModelConfig {
            num_heads: heads,
            clusters_per_head: clusters,
            input_size: 8,
            in_channels: 3,
            base_filters: 4,
            embed_dim: 8,
            dropout_rate: 0.0,
        };
        let device = Default::default();
        let model = SelfLabelNet::<TestBackend>::new(&config, &device);
        let dataset = SelfLabelDataset::synthetic(n, 8, clusters, 5);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let labels = LabelAssignment::initialize(heads, n, clusters, &mut rng);
        (model, dataset, labels)
    }

    #[test]
    fn test_update_replaces_all_heads() {
        let (model, dataset, mut labels) = setup(40, 2, 5);
        let before = labels.clone();

        let updater = AssignmentUpdater::<TestBackend>::new(
            DeviceCapability::HostOnly,
            SinkhornConfig::default(),
        );
        updater.update(&model, &dataset, &mut labels, 16).unwrap();

        assert_ne!(labels, before);
        for head in 0..2 {
            let counts = labels.cluster_counts(head);
            assert_eq!(counts.iter().sum::<usize>(), 40);
        }
    }

    #[test]
    fn test_update_is_deterministic_for_fixed_model() {
        let (model, dataset, labels) = setup(30, 1, 3);

        let updater = AssignmentUpdater::<TestBackend>::new(
            DeviceCapability::HostOnly,
            SinkhornConfig::default(),
        );

        let mut first = labels.clone();
        updater.update(&model, &dataset, &mut first, 10).unwrap();
        let mut second = labels.clone();
        updater.update(&model, &dataset, &mut second, 10).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_device_solver_variant_also_runs() {
        let (model, dataset, mut labels) = setup(20, 1, 4);

        let updater = AssignmentUpdater::<TestBackend>::new(
            DeviceCapability::Accelerated,
            SinkhornConfig::default(),
        );
        assert_eq!(updater.solver_name(), "sinkhorn-device");
        updater.update(&model, &dataset, &mut labels, 8).unwrap();
    }

    #[test]
    fn test_shape_mismatch_is_fatal() {
        let (model, dataset, _) = setup(20, 1, 4);
        // Labels sized for a different dataset length.
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut labels = LabelAssignment::initialize(1, 25, 4, &mut rng);

        let updater = AssignmentUpdater::<TestBackend>::new(
            DeviceCapability::HostOnly,
            SinkhornConfig::default(),
        );
        let result = updater.update(&model, &dataset, &mut labels, 8);
        assert!(matches!(
            result,
            Err(SelfLabelError::LabelShapeMismatch { .. })
        ));
    }
}
