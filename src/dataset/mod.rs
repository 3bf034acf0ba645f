//! Dataset integration for self-labelling training.
//!
//! Implements Burn's `Dataset` trait and a batcher producing the tuple the
//! trainer consumes per batch: images, held-out ground-truth labels (never
//! trained on), and the example indices used for pseudo-label lookups.

pub mod loader;

use std::marker::PhantomData;
use std::path::PathBuf;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::imageops::FilterType;
use image::ImageReader;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, SelfLabelError};

pub use loader::{DatasetStats, ImageFolderDataset, ImageSample};

/// Per-channel normalization statistics applied at load time
const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// A single training example ready for batching
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelfLabelItem {
    /// Image data as flattened CHW float array [channels * H * W]
    pub image: Vec<f32>,
    /// Held-out ground-truth class; carried for evaluation only
    pub truth: usize,
    /// Position of this example in the dataset, used to address its
    /// pseudo-labels
    pub index: usize,
}

impl SelfLabelItem {
    /// Load and preprocess an image from disk
    pub fn from_path(
        path: &PathBuf,
        truth: usize,
        index: usize,
        image_size: usize,
    ) -> Result<Self> {
        let img = ImageReader::open(path)
            .map_err(|e| SelfLabelError::ImageLoad(path.clone(), e.to_string()))?
            .decode()
            .map_err(|e| SelfLabelError::ImageLoad(path.clone(), e.to_string()))?
            .resize_exact(image_size as u32, image_size as u32, FilterType::Triangle)
            .to_rgb8();

        let (width, height) = (image_size, image_size);
        let mut image = vec![0.0f32; 3 * height * width];

        // CHW layout, scaled to [0, 1] then channel-normalized
        for y in 0..height {
            for x in 0..width {
                let pixel = img.get_pixel(x as u32, y as u32);
                for c in 0..3 {
                    let value = pixel[c] as f32 / 255.0;
                    image[c * height * width + y * width + x] =
                        (value - CHANNEL_MEAN[c]) / CHANNEL_STD[c];
                }
            }
        }

        Ok(Self {
            image,
            truth,
            index,
        })
    }
}

/// In-memory dataset of preprocessed examples
///
/// All items are cached up front; the reassignment pass iterates the full
/// dataset in index order, so example `i` is always `items[i]`.
#[derive(Debug, Clone)]
pub struct SelfLabelDataset {
    items: Vec<SelfLabelItem>,
    image_size: usize,
    channels: usize,
}

impl SelfLabelDataset {
    /// Load and cache every image referenced by an [`ImageFolderDataset`]
    pub fn from_folder(folder: &ImageFolderDataset, image_size: usize) -> Result<Self> {
        let items = folder
            .samples
            .iter()
            .enumerate()
            .map(|(index, sample)| {
                SelfLabelItem::from_path(&sample.path, sample.label, index, image_size)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            items,
            image_size,
            channels: 3,
        })
    }

    /// Deterministic synthetic dataset for tests and dry runs
    pub fn synthetic(n: usize, image_size: usize, num_classes: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let pixels = 3 * image_size * image_size;

        let items = (0..n)
            .map(|index| {
                let image = (0..pixels).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
                SelfLabelItem {
                    image,
                    truth: index % num_classes.max(1),
                    index,
                }
            })
            .collect();

        Self {
            items,
            image_size,
            channels: 3,
        }
    }

    /// Edge length of the (square) cached images
    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Number of channels per image
    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl Dataset<SelfLabelItem> for SelfLabelDataset {
    fn get(&self, index: usize) -> Option<SelfLabelItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A batch of examples for one training step
#[derive(Clone, Debug)]
pub struct SelfLabelBatch<B: Backend> {
    /// Images with shape [batch_size, channels, height, width]
    pub images: Tensor<B, 4>,
    /// Held-out ground-truth labels with shape [batch_size]; not used by the
    /// training objective
    pub truths: Tensor<B, 1, Int>,
    /// Dataset index of each example, for pseudo-label lookups
    pub indices: Vec<usize>,
}

/// Batcher assembling [`SelfLabelBatch`]es on a device
#[derive(Clone, Debug)]
pub struct SelfLabelBatcher<B: Backend> {
    image_size: usize,
    channels: usize,
    _backend: PhantomData<B>,
}

impl<B: Backend> SelfLabelBatcher<B> {
    /// Create a batcher for images of the given size
    pub fn new(image_size: usize, channels: usize) -> Self {
        Self {
            image_size,
            channels,
            _backend: PhantomData,
        }
    }
}

impl<B: Backend> Batcher<B, SelfLabelItem, SelfLabelBatch<B>> for SelfLabelBatcher<B> {
    fn batch(&self, items: Vec<SelfLabelItem>, device: &B::Device) -> SelfLabelBatch<B> {
        let batch_size = items.len();
        let (channels, height, width) = (self.channels, self.image_size, self.image_size);

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.clone()).collect();
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(images_data, [batch_size, channels, height, width]),
            device,
        );

        let truths_data: Vec<i64> = items.iter().map(|item| item.truth as i64).collect();
        let truths = Tensor::<B, 1, Int>::from_data(
            TensorData::new(truths_data, [batch_size]),
            device,
        );

        let indices = items.iter().map(|item| item.index).collect();

        SelfLabelBatch {
            images,
            truths,
            indices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_synthetic_dataset_len_and_indices() {
        let dataset = SelfLabelDataset::synthetic(20, 8, 5, 7);
        assert_eq!(dataset.len(), 20);

        for i in 0..20 {
            let item = dataset.get(i).unwrap();
            assert_eq!(item.index, i);
            assert_eq!(item.truth, i % 5);
            assert_eq!(item.image.len(), 3 * 8 * 8);
        }
        assert!(dataset.get(20).is_none());
    }

    #[test]
    fn test_synthetic_dataset_deterministic() {
        let a = SelfLabelDataset::synthetic(4, 8, 2, 11);
        let b = SelfLabelDataset::synthetic(4, 8, 2, 11);
        assert_eq!(a.get(3).unwrap().image, b.get(3).unwrap().image);
    }

    #[test]
    fn test_batcher_shapes() {
        let device = Default::default();
        let dataset = SelfLabelDataset::synthetic(10, 8, 3, 1);
        let batcher = SelfLabelBatcher::<TestBackend>::new(8, 3);

        let items: Vec<_> = (2..6).filter_map(|i| dataset.get(i)).collect();
        let batch = batcher.batch(items, &device);

        assert_eq!(batch.images.dims(), [4, 3, 8, 8]);
        assert_eq!(batch.truths.dims(), [4]);
        assert_eq!(batch.indices, vec![2, 3, 4, 5]);
    }
}
