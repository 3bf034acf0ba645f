//! End-to-end training scenarios on the NdArray backend with synthetic data.

use std::path::PathBuf;

use burn::backend::Autodiff;
use burn_ndarray::NdArray;

use selflabel::backend::DeviceCapability;
use selflabel::dataset::SelfLabelDataset;
use selflabel::model::{ModelConfig, SelfLabelNet, TrainConfig};
use selflabel::training::{build_optimizer, AssignmentUpdater, SinkhornConfig, Trainer};
use selflabel::utils::error::SelfLabelError;
use selflabel::utils::metrics::NullMetrics;

type B = Autodiff<NdArray>;

fn run_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("selflabel-e2e-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn model_config(num_heads: usize, clusters: usize) -> ModelConfig {
    ModelConfig {
        num_heads,
        clusters_per_head: clusters,
        input_size: 8,
        in_channels: 3,
        base_filters: 4,
        embed_dim: 8,
        dropout_rate: 0.1,
    }
}

fn make_trainer(
    train_config: TrainConfig,
    model_config: &ModelConfig,
    n: usize,
) -> Result<Trainer<B, impl burn::optim::Optimizer<SelfLabelNet<B>, B>>, SelfLabelError> {
    let device = Default::default();
    let dataset = SelfLabelDataset::synthetic(n, model_config.input_size, 10, 21);
    let model = SelfLabelNet::<B>::new(model_config, &device);
    let optimizer = build_optimizer::<B>(&train_config);
    let updater = AssignmentUpdater::<B>::new(
        DeviceCapability::HostOnly,
        SinkhornConfig::from_train(&train_config),
    );

    Trainer::new(
        train_config,
        model_config,
        dataset,
        model,
        optimizer,
        updater,
        Box::new(NullMetrics),
        device,
    )
}

/// N=1000, batch 100, 3 epochs, 2 scheduled events: both fire, at the right
/// global steps, and the label matrix is a different valid assignment
/// afterwards.
#[test]
fn reassignment_events_fire_at_scheduled_boundaries() {
    let dir = run_dir("events");
    let train_config = TrainConfig {
        epochs: 3,
        batch_size: 100,
        num_events: 2,
        base_lr: 0.05,
        log_iter: 100,
        log_intv: 10,
        seed: 42,
        run_dir: dir.clone(),
        resume: false,
        ..Default::default()
    };
    let model_config = model_config(2, 10);

    let mut trainer = make_trainer(train_config, &model_config, 1000).unwrap();
    let initial_labels = trainer.labels().clone();
    let report = trainer.run().unwrap();

    // Epochs 0..=3, 10 batches each. Thresholds in example units are
    // 1000 * 4.01 * (1/3)^2 = 445.6 and 1000 * 4.01 * (2/3)^2 = 1782.2,
    // crossed at global steps 5 and 18. The sentinel (5000 examples per
    // step-unit) is never reached.
    assert_eq!(report.epochs_completed, 4);
    assert_eq!(report.reassignments, 2);
    assert_eq!(report.reassignment_steps, vec![5, 18]);

    // The assignment changed and is still a complete, in-range labelling.
    let labels = trainer.labels();
    assert_ne!(labels, &initial_labels);
    for head in 0..2 {
        let counts = labels.cluster_counts(head);
        assert_eq!(counts.iter().sum::<usize>(), 1000);
    }

    assert!(report.lowest_loss.is_finite());
    assert!(dir.join("model_final.mpk").exists());

    let _ = std::fs::remove_dir_all(&dir);
}

/// A second process resumes from the latest checkpoint: the epoch counter
/// continues where training stopped, already-passed thresholds are not
/// replayed, and the label matrix survives the round trip.
#[test]
fn resume_continues_epoch_and_filters_schedule() {
    let dir = run_dir("resume");
    let model_config = model_config(1, 6);

    // First run: epochs 0..=1.
    let first_config = TrainConfig {
        epochs: 1,
        batch_size: 50,
        num_events: 2,
        base_lr: 0.05,
        log_iter: 10,
        log_intv: 1,
        seed: 9,
        run_dir: dir.clone(),
        resume: true,
        ..Default::default()
    };
    let mut first = make_trainer(first_config, &model_config, 200).unwrap();
    let first_report = first.run().unwrap();
    assert_eq!(first_report.epochs_completed, 2);
    let labels_after_first = first.labels().clone();

    // Second run resumes at epoch 2 with a 3-epoch budget. Both quadratic
    // thresholds for epochs=3 fall before epoch 2 (0.45 and 1.78 in epoch
    // units), so the filtered schedule holds only the sentinel: a valid,
    // degenerate state with no further reassignment.
    let second_config = TrainConfig {
        epochs: 3,
        batch_size: 50,
        num_events: 2,
        base_lr: 0.05,
        log_iter: 10,
        log_intv: 1,
        seed: 9,
        run_dir: dir.clone(),
        resume: true,
        ..Default::default()
    };
    let mut second = make_trainer(second_config, &model_config, 200).unwrap();
    assert_eq!(second.first_epoch(), 2);
    assert_eq!(second.pending_events(), 0);
    assert_eq!(second.labels(), &labels_after_first);

    let second_report = second.run().unwrap();
    assert_eq!(second_report.epochs_completed, 2); // epochs 2 and 3
    assert_eq!(second_report.reassignments, 0);

    let _ = std::fs::remove_dir_all(&dir);
}

/// Resuming with an incompatible head/cluster configuration must fail
/// loudly instead of training against a corrupt label matrix.
#[test]
fn resume_with_mismatched_label_shape_is_fatal() {
    let dir = run_dir("mismatch");
    let first_config = TrainConfig {
        epochs: 0,
        batch_size: 50,
        num_events: 1,
        base_lr: 0.05,
        log_iter: 10,
        log_intv: 1,
        seed: 5,
        run_dir: dir.clone(),
        resume: true,
        ..Default::default()
    };
    let mut first = make_trainer(first_config.clone(), &model_config(1, 6), 100).unwrap();
    first.run().unwrap();

    // Same run directory, but the dataset now holds 120 examples: the
    // checkpointed 1x100 label matrix no longer covers it.
    let result = make_trainer(first_config.clone(), &model_config(1, 6), 120);
    assert!(matches!(
        result,
        Err(SelfLabelError::LabelShapeMismatch { .. })
    ));

    // A different cluster vocabulary is also fatal (the head record no
    // longer matches the module), even before label validation.
    let result = make_trainer(first_config, &model_config(1, 8), 100);
    assert!(result.is_err());

    let _ = std::fs::remove_dir_all(&dir);
}
