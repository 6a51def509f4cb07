use std::path::Path;

use burn::data::dataset::{Dataset, InMemDataset};

use super::{read_dataset_file, ImageItem, Split, NUM_CLASSES};
use crate::error::{Error, Result};

const TRAIN_BATCHES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_BATCHES: [&str; 1] = ["test_batch.bin"];

pub const CIFAR10_WIDTH: usize = 32;
pub const CIFAR10_HEIGHT: usize = 32;

const IMAGE_SIZE: usize = 3 * CIFAR10_WIDTH * CIFAR10_HEIGHT;
// One label byte followed by the red, green and blue planes.
const RECORD_SIZE: usize = 1 + IMAGE_SIZE;

/// The CIFAR-10 dataset read from the binary version of the archive.
///
/// The batch files are looked up in the directory itself and in `cifar-10-batches-bin` below it.
pub struct Cifar10Dataset {
    dataset: InMemDataset<ImageItem>,
}

impl Dataset<ImageItem> for Cifar10Dataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl Cifar10Dataset {
    /// Loads the 50,000 training images.
    pub fn train<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::new(dir, Split::Train)
    }

    /// Loads the 10,000 test images.
    pub fn test<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::new(dir, Split::Test)
    }

    pub fn new<P: AsRef<Path>>(dir: P, split: Split) -> Result<Self> {
        let root = dir.as_ref();
        let dirs = vec![root.to_path_buf(), root.join("cifar-10-batches-bin")];

        let batches: &[&str] = match split {
            Split::Train => &TRAIN_BATCHES,
            Split::Test => &TEST_BATCHES,
        };

        let mut items = Vec::new();
        for name in batches {
            let (path, bytes) = read_dataset_file(&dirs, name)?;
            items.extend(parse_records(&path, &bytes)?);
        }

        Ok(Self {
            dataset: InMemDataset::new(items),
        })
    }
}

fn parse_records(path: &Path, bytes: &[u8]) -> Result<Vec<ImageItem>> {
    if bytes.len() % RECORD_SIZE != 0 {
        return Err(Error::invalid_dataset(
            path,
            format!(
                "{} bytes is not a whole number of {RECORD_SIZE}-byte records",
                bytes.len()
            ),
        ));
    }

    bytes
        .chunks(RECORD_SIZE)
        .map(|record| {
            let label = record[0];
            if label as usize >= NUM_CLASSES {
                return Err(Error::invalid_dataset(
                    path,
                    format!("label {label} is out of range"),
                ));
            }

            Ok(ImageItem {
                pixels: record[1..].to_vec(),
                label,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(label: u8, fill: u8) -> Vec<u8> {
        let mut bytes = vec![label];
        bytes.extend(std::iter::repeat(fill).take(IMAGE_SIZE));
        bytes
    }

    #[test]
    fn reads_all_train_batches() {
        let dir = tempfile::tempdir().unwrap();
        let batches = dir.path().join("cifar-10-batches-bin");
        std::fs::create_dir_all(&batches).unwrap();
        for (i, name) in TRAIN_BATCHES.iter().enumerate() {
            let mut bytes = record(i as u8, 10 * i as u8);
            bytes.extend(record(9, 255));
            std::fs::write(batches.join(name), bytes).unwrap();
        }

        let dataset = Cifar10Dataset::train(dir.path()).unwrap();

        assert_eq!(dataset.len(), 10);
        let item = dataset.get(4).unwrap();
        assert_eq!(item.label, 2);
        assert_eq!(item.pixels.len(), IMAGE_SIZE);
        assert!(item.pixels.iter().all(|pixel| *pixel == 20));
        assert_eq!(dataset.get(9).unwrap().label, 9);
    }

    #[test]
    fn rejects_partial_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = record(1, 0);
        bytes.pop();
        std::fs::write(dir.path().join("test_batch.bin"), bytes).unwrap();

        let result = Cifar10Dataset::test(dir.path());

        assert!(matches!(result, Err(Error::InvalidDataset { .. })));
    }

    #[test]
    fn rejects_out_of_range_label() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test_batch.bin"), record(10, 0)).unwrap();

        assert!(Cifar10Dataset::test(dir.path()).is_err());
    }

    #[test]
    fn missing_batch_is_reported() {
        let dir = tempfile::tempdir().unwrap();

        let result = Cifar10Dataset::train(dir.path());

        assert!(matches!(result, Err(Error::MissingDatasetFile { .. })));
    }
}
