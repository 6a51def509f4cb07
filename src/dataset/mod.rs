mod cifar10;
mod mnist;

pub use cifar10::*;
pub use mnist::*;

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use clap::ValueEnum;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::NetConfig;

/// Number of classes in both supported datasets.
pub const NUM_CLASSES: usize = 10;

/// A single labeled image with its pixels stored in channel-major (CHW) order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageItem {
    /// Raw pixel intensities.
    pub pixels: Vec<u8>,
    /// Class index in `0..NUM_CLASSES`.
    pub label: u8,
}

/// Dataset partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

/// The image classification datasets the experiments run on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    /// 28x28 grayscale handwritten digits.
    Mnist,
    /// 32x32 color images of 10 object classes.
    Cifar10,
}

impl DatasetKind {
    /// Image shape as `[channels, height, width]`.
    pub fn shape(&self) -> [usize; 3] {
        match self {
            Self::Mnist => [1, MNIST_HEIGHT, MNIST_WIDTH],
            Self::Cifar10 => [3, CIFAR10_HEIGHT, CIFAR10_WIDTH],
        }
    }

    /// Per-channel mean used for input normalization.
    pub fn mean(&self) -> &'static [f32] {
        match self {
            Self::Mnist => &[0.1307],
            Self::Cifar10 => &[0.4914, 0.48216, 0.44653],
        }
    }

    /// Per-channel standard deviation used for input normalization.
    pub fn std(&self) -> &'static [f32] {
        match self {
            Self::Mnist => &[0.3081],
            Self::Cifar10 => &[0.24703, 0.24349, 0.26159],
        }
    }

    pub fn class_names(&self) -> [&'static str; NUM_CLASSES] {
        match self {
            Self::Mnist => ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"],
            Self::Cifar10 => [
                "airplane",
                "automobile",
                "bird",
                "cat",
                "deer",
                "dog",
                "frog",
                "horse",
                "ship",
                "truck",
            ],
        }
    }

    /// Network configuration matching the image shape of the dataset.
    pub fn model_config(&self) -> NetConfig {
        let [channels, height, _width] = self.shape();

        NetConfig::new()
            .with_channels(channels)
            .with_image_size(height)
            .with_num_classes(NUM_CLASSES)
    }

    /// Loads one split of the dataset from `dir`.
    pub fn load(&self, dir: &Path, split: Split) -> Result<Box<dyn Dataset<ImageItem>>> {
        let dataset: Box<dyn Dataset<ImageItem>> = match self {
            Self::Mnist => Box::new(MnistDataset::new(dir, split)?),
            Self::Cifar10 => Box::new(Cifar10Dataset::new(dir, split)?),
        };

        log::info!(
            "Loaded {:?} {:?} split from '{}' ({} items)",
            self,
            split,
            dir.display(),
            dataset.len()
        );

        Ok(dataset)
    }
}

/// Reads `name` from the first directory that holds it.
///
/// A gzip-compressed `<name>.gz` sibling is decompressed when the raw file is missing.
pub(crate) fn read_dataset_file(dirs: &[PathBuf], name: &str) -> Result<(PathBuf, Vec<u8>)> {
    for dir in dirs {
        let path = dir.join(name);
        if path.is_file() {
            let bytes = fs::read(&path).map_err(|err| Error::io(&path, err))?;
            return Ok((path, bytes));
        }

        let path = dir.join(format!("{name}.gz"));
        if path.is_file() {
            let file = File::open(&path).map_err(|err| Error::io(&path, err))?;
            let mut bytes = Vec::new();
            GzDecoder::new(file)
                .read_to_end(&mut bytes)
                .map_err(|err| Error::io(&path, err))?;
            return Ok((path, bytes));
        }
    }

    Err(Error::MissingDatasetFile {
        name: name.to_string(),
        searched: dirs.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_matches_channels() {
        for kind in [DatasetKind::Mnist, DatasetKind::Cifar10] {
            let [channels, _, _] = kind.shape();
            assert_eq!(kind.mean().len(), channels);
            assert_eq!(kind.std().len(), channels);
        }
    }

    #[test]
    fn model_config_follows_shape() {
        let config = DatasetKind::Cifar10.model_config();
        assert_eq!(config.channels, 3);
        assert_eq!(config.image_size, 32);
        assert_eq!(config.num_classes, NUM_CLASSES);

        let config = DatasetKind::Mnist.model_config();
        assert_eq!(config.channels, 1);
        assert_eq!(config.image_size, 28);
    }

    #[test]
    fn missing_file_lists_searched_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = vec![dir.path().to_path_buf(), dir.path().join("raw")];

        match read_dataset_file(&dirs, "nothing-here") {
            Err(Error::MissingDatasetFile { name, searched }) => {
                assert_eq!(name, "nothing-here");
                assert_eq!(searched, dirs);
            }
            other => panic!("Unexpected result {other:?}"),
        }
    }
}
