//! Image-Folder Dataset Loader
//!
//! Scans a class-per-directory image tree. Class labels are kept only as
//! held-out ground truth for evaluation; the training objective never reads
//! them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;
use walkdir::WalkDir;

use crate::utils::error::{Result, SelfLabelError};

/// Image file extensions accepted by the scanner
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// A single image sample with its held-out label and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Held-out class label index
    pub label: usize,
    /// Class name taken from the directory name
    pub class_name: String,
}

/// Summary statistics of a scanned dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_samples: usize,
    pub num_classes: usize,
    /// Samples per class, indexed by label
    pub class_counts: Vec<usize>,
}

/// Image dataset scanned from a directory tree
///
/// Expected layout:
/// ```text
/// root_dir/
/// ├── class_a/
/// │   ├── image1.jpg
/// │   └── image2.jpg
/// └── class_b/
///     └── ...
/// ```
#[derive(Debug)]
pub struct ImageFolderDataset {
    /// Root directory of the dataset
    pub root_dir: PathBuf,
    /// All samples found in the tree
    pub samples: Vec<ImageSample>,
    /// Mapping from class name to label index
    pub class_to_idx: HashMap<String, usize>,
}

impl ImageFolderDataset {
    /// Scan a dataset directory
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Scanning image dataset at {:?}", root_dir);

        if !root_dir.exists() {
            return Err(SelfLabelError::Dataset(format!(
                "dataset directory does not exist: {:?}",
                root_dir
            )));
        }

        let mut class_dirs: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&root_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    class_dirs.push(name.to_string());
                }
            }
        }
        class_dirs.sort();

        if class_dirs.is_empty() {
            return Err(SelfLabelError::Dataset(format!(
                "no class directories found under {:?}",
                root_dir
            )));
        }

        let class_to_idx: HashMap<String, usize> = class_dirs
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();

        let mut samples = Vec::new();
        for class_name in &class_dirs {
            let label = class_to_idx[class_name];
            let class_dir = root_dir.join(class_name);

            for entry in WalkDir::new(&class_dir)
                .max_depth(2)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let is_image = entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                    .unwrap_or(false);
                if is_image {
                    samples.push(ImageSample {
                        path: entry.path().to_path_buf(),
                        label,
                        class_name: class_name.clone(),
                    });
                }
            }
        }

        info!(
            "Found {} samples across {} classes",
            samples.len(),
            class_dirs.len()
        );

        Ok(Self {
            root_dir,
            samples,
            class_to_idx,
        })
    }

    /// Keep only the first `max` samples (for quick test runs)
    pub fn truncate(&mut self, max: usize) {
        self.samples.truncate(max);
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the dataset is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Compute dataset statistics
    pub fn stats(&self) -> DatasetStats {
        let num_classes = self.class_to_idx.len();
        let mut class_counts = vec![0usize; num_classes];
        for sample in &self.samples {
            if sample.label < num_classes {
                class_counts[sample.label] += 1;
            }
        }

        DatasetStats {
            total_samples: self.samples.len(),
            num_classes,
            class_counts,
        }
    }
}
