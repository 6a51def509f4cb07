use std::sync::Arc;

use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    prelude::*,
};

use crate::dataset::{DatasetKind, ImageItem};

/// Turns [image items](ImageItem) into normalized image batches.
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    shape: [usize; 3],
    mean: Vec<f32>,
    std: Vec<f32>,
}

#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Images with shape `[batch_size, channels, height, width]`.
    pub images: Tensor<B, 4>,
    /// Class indices with shape `[batch_size]`.
    pub targets: Tensor<B, 1, Int>,
}

impl ImageBatcher {
    /// Creates a batcher with an explicit image shape and per-channel normalization.
    pub fn new(shape: [usize; 3], mean: Vec<f32>, std: Vec<f32>) -> Self {
        assert_eq!(mean.len(), shape[0], "One mean value per channel");
        assert_eq!(std.len(), shape[0], "One std value per channel");

        Self { shape, mean, std }
    }

    /// Creates the batcher for a dataset kind.
    pub fn for_dataset(kind: DatasetKind) -> Self {
        Self::new(kind.shape(), kind.mean().to_vec(), kind.std().to_vec())
    }

    fn channel_stats<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let channels = self.shape[0];
        let mean = Tensor::<B, 1>::from_data(TensorData::new(self.mean.clone(), [channels]), device)
            .reshape([1, channels, 1, 1]);
        let std = Tensor::<B, 1>::from_data(TensorData::new(self.std.clone(), [channels]), device)
            .reshape([1, channels, 1, 1]);

        (mean, std)
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let [channels, height, width] = self.shape;
        let batch_size = items.len();

        let mut pixels = Vec::with_capacity(batch_size * channels * height * width);
        let mut labels = Vec::with_capacity(batch_size);
        for item in items {
            pixels.extend(item.pixels.iter().map(|pixel| *pixel as f32 / 255.0));
            labels.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [batch_size, channels, height, width]),
            device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [batch_size]), device);

        let (mean, std) = self.channel_stats::<B>(device);
        let images = (images - mean) / std;

        ImageBatch { images, targets }
    }
}

/// Options shared by the train and test data loaders.
#[derive(Clone, Debug)]
pub struct LoaderOptions {
    pub batch_size: usize,
    pub num_workers: usize,
    /// Shuffles the items at every epoch when set.
    pub shuffle_seed: Option<u64>,
}

/// Builds a data loader producing [image batches](ImageBatch) on `device`.
pub fn image_loader<B: Backend, D>(
    kind: DatasetKind,
    dataset: D,
    options: &LoaderOptions,
    device: &B::Device,
) -> Arc<dyn DataLoader<B, ImageBatch<B>>>
where
    D: Dataset<ImageItem> + 'static,
{
    let mut builder = DataLoaderBuilder::new(ImageBatcher::for_dataset(kind))
        .batch_size(options.batch_size)
        .num_workers(options.num_workers)
        .set_device(device.clone());

    if let Some(seed) = options.shuffle_seed {
        builder = builder.shuffle(seed);
    }

    builder.build(dataset)
}
