//! Self-Labelling Training CLI
//!
//! Entry point for self-supervised representation learning by self-labelling
//! with the Burn framework.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use selflabel::backend::{backend_name, default_device, DeviceCapability, TrainingBackend};
use selflabel::dataset::{ImageFolderDataset, SelfLabelDataset};
use selflabel::model::{ModelConfig, Precision, SelfLabelNet, TrainConfig};
use selflabel::training::{build_optimizer, AssignmentUpdater, SinkhornConfig, Trainer};
use selflabel::utils::logging::{init_logging, LogConfig};
use selflabel::utils::metrics::{LogMetrics, MetricsSink, NullMetrics};

/// Self-supervised learning by self-labelling
///
/// Trains a multi-head CNN with pseudo-labels that are periodically
/// recomputed through a balanced optimal-transport assignment.
#[derive(Parser, Debug)]
#[command(name = "selflabel")]
#[command(version)]
#[command(about = "Self-labelling visual representation learning with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train with alternating SGD and label reassignment
    Train {
        /// Path to the image dataset directory (one subdirectory per class)
        #[arg(short, long, default_value = "data/train")]
        data_dir: String,

        /// Number of epochs
        #[arg(long, default_value = "200")]
        epochs: usize,

        /// Batch size
        #[arg(short, long, default_value = "256")]
        batch_size: usize,

        /// Initial learning rate
        #[arg(long, default_value = "0.08")]
        lr: f64,

        /// Multiply the learning rate by 0.1 every this many epochs
        #[arg(long, default_value = "150")]
        lrdrop: usize,

        /// Weight decay
        #[arg(long, default_value = "0.00001")]
        wd: f32,

        /// Number of pseudo-label reassignment events
        #[arg(long, default_value = "100")]
        nopts: usize,

        /// Sharpening exponent lambda for the balancing solver
        #[arg(long, default_value = "25.0")]
        lamb: f64,

        /// Force the host (CPU) solver variant
        #[arg(long, default_value = "false")]
        cpu: bool,

        /// Solver precision (f64 or f32)
        #[arg(long, default_value = "f64", value_parser = ["f64", "f32"])]
        sk_dtype: String,

        /// Number of clusters per head
        #[arg(long, default_value = "3000")]
        ncl: usize,

        /// Number of heads
        #[arg(long, default_value = "1")]
        hc: usize,

        /// Input image size (square, multiple of 8)
        #[arg(long, default_value = "64")]
        image_size: usize,

        /// Experiment directory for checkpoints and the final model
        #[arg(long, default_value = "output/self-label-default")]
        exp: String,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Emit scalar metrics every this many batches
        #[arg(long, default_value = "200")]
        log_iter: usize,

        /// Emit the parameter summary every this many epochs
        #[arg(long, default_value = "1")]
        log_intv: usize,

        /// Start fresh even if a checkpoint exists in the experiment dir
        #[arg(long, default_value = "false")]
        no_resume: bool,

        /// Disable scalar metric emission
        #[arg(long, default_value = "false")]
        no_metrics: bool,

        /// Quick test mode - use only 500 samples for fast verification
        #[arg(long, default_value = "false")]
        quick: bool,
    },

    /// Show dataset statistics
    Stats {
        /// Path to the dataset directory
        #[arg(short, long, default_value = "data/train")]
        data_dir: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    match cli.command {
        Commands::Train {
            data_dir,
            epochs,
            batch_size,
            lr,
            lrdrop,
            wd,
            nopts,
            lamb,
            cpu,
            sk_dtype,
            ncl,
            hc,
            image_size,
            exp,
            seed,
            log_iter,
            log_intv,
            no_resume,
            no_metrics,
            quick,
        } => {
            let train_config = TrainConfig {
                epochs,
                batch_size,
                base_lr: lr,
                lr_drop_interval: lrdrop,
                weight_decay: wd,
                num_events: nopts,
                lambda: lamb,
                sk_precision: if sk_dtype == "f32" {
                    Precision::Reduced
                } else {
                    Precision::Full
                },
                log_iter,
                log_intv,
                seed,
                run_dir: PathBuf::from(exp),
                resume: !no_resume,
                ..Default::default()
            };
            let model_config = ModelConfig {
                num_heads: hc,
                clusters_per_head: ncl,
                input_size: image_size,
                ..Default::default()
            };

            let max_samples = if quick {
                println!("{}", "Quick test mode: using only 500 samples".yellow().bold());
                Some(500usize)
            } else {
                None
            };

            cmd_train(&data_dir, train_config, model_config, cpu, no_metrics, max_samples)?;
        }

        Commands::Stats { data_dir } => {
            cmd_stats(&data_dir)?;
        }
    }

    Ok(())
}

fn cmd_train(
    data_dir: &str,
    train_config: TrainConfig,
    model_config: ModelConfig,
    force_cpu_solver: bool,
    no_metrics: bool,
    max_samples: Option<usize>,
) -> Result<()> {
    println!("{}", "Initializing Training...".green().bold());

    let device = default_device();

    println!("{}", "Loading Dataset...".cyan());
    let mut folder = ImageFolderDataset::new(data_dir)?;
    if folder.is_empty() {
        println!("{} No images found in dataset directory!", "Error:".red());
        println!();
        println!("Expected layout: {}/{{class_name}}/*.jpg", data_dir);
        return Ok(());
    }
    if let Some(max) = max_samples {
        folder.truncate(max);
    }

    let dataset = SelfLabelDataset::from_folder(&folder, model_config.input_size)?;
    let n = folder.len();

    println!();
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Samples:         {}", n);
    println!("  Epochs:          0..={}", train_config.epochs);
    println!("  Batch size:      {}", train_config.batch_size);
    println!("  Learning rate:   {} (drop every {} epochs)", train_config.base_lr, train_config.lr_drop_interval);
    println!("  Heads x clusters: {} x {}", model_config.num_heads, model_config.clusters_per_head);
    println!("  Reassignments:   {}", train_config.num_events);
    println!("  Backend:         {}", backend_name());
    println!("  Experiment dir:  {:?}", train_config.run_dir);
    println!();

    let capability = if force_cpu_solver {
        DeviceCapability::HostOnly
    } else {
        DeviceCapability::detect()
    };

    let model = SelfLabelNet::<TrainingBackend>::new(&model_config, &device);
    let optimizer = build_optimizer::<TrainingBackend>(&train_config);
    let updater = AssignmentUpdater::<TrainingBackend>::new(
        capability,
        SinkhornConfig::from_train(&train_config),
    );
    info!("Assignment solver: {}", updater.solver_name());

    let sink: Box<dyn MetricsSink> = if no_metrics {
        Box::new(NullMetrics)
    } else {
        Box::new(LogMetrics)
    };

    println!("{}", "Starting Training...".green().bold());
    let mut trainer = Trainer::new(
        train_config,
        &model_config,
        dataset,
        model,
        optimizer,
        updater,
        sink,
        device,
    )?;
    let report = trainer.run()?;

    println!();
    println!("{}", "Training Complete!".green().bold());
    println!("  Epochs run:       {}", report.epochs_completed);
    println!("  Reassignments:    {}", report.reassignments);
    println!("  Lowest loss:      {:.4}", report.lowest_loss);
    println!("  Final model:      {:?}", report.final_model_path);

    Ok(())
}

fn cmd_stats(data_dir: &str) -> Result<()> {
    info!("Computing dataset statistics for: {}", data_dir);

    let dataset = match ImageFolderDataset::new(data_dir) {
        Ok(dataset) => dataset,
        Err(e) => {
            println!("{} Failed to load dataset: {}", "Error:".red(), e);
            return Ok(());
        }
    };

    let stats = dataset.stats();
    let mut names: Vec<(&str, usize)> = dataset
        .class_to_idx
        .iter()
        .map(|(name, &idx)| (name.as_str(), idx))
        .collect();
    names.sort_by_key(|&(_, idx)| idx);

    println!("{}", "Dataset Statistics:".cyan().bold());
    println!("  Total samples:     {}", stats.total_samples);
    println!("  Number of classes: {}", stats.num_classes);
    println!();
    println!("{}", "Class Distribution (held out from training):".cyan().bold());
    for (name, idx) in names {
        let count = stats.class_counts[idx];
        let pct = 100.0 * count as f64 / stats.total_samples.max(1) as f64;
        println!("  {:40} {:>6} ({:>5.1}%)", name, count, pct);
    }

    Ok(())
}
