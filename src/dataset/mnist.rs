use std::path::{Path, PathBuf};

use burn::data::dataset::{Dataset, InMemDataset};

use super::{read_dataset_file, ImageItem, Split, NUM_CLASSES};
use crate::error::{Error, Result};

const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

pub const MNIST_WIDTH: usize = 28;
pub const MNIST_HEIGHT: usize = 28;

/// The MNIST dataset read from the IDX files of a local directory.
///
/// Files are looked up in the directory itself and in `MNIST/raw` below it, which is where
/// torchvision stores them. Gzip-compressed files are accepted as well.
pub struct MnistDataset {
    dataset: InMemDataset<ImageItem>,
}

impl Dataset<ImageItem> for MnistDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl MnistDataset {
    /// Loads the 60,000 training images.
    pub fn train<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::new(dir, Split::Train)
    }

    /// Loads the 10,000 test images.
    pub fn test<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::new(dir, Split::Test)
    }

    pub fn new<P: AsRef<Path>>(dir: P, split: Split) -> Result<Self> {
        let root = dir.as_ref();
        let dirs = vec![root.to_path_buf(), root.join("MNIST").join("raw")];

        let (images_file, labels_file) = match split {
            Split::Train => (TRAIN_IMAGES, TRAIN_LABELS),
            Split::Test => (TEST_IMAGES, TEST_LABELS),
        };

        let images = read_images(&dirs, images_file)?;
        let (labels_path, labels) = read_labels(&dirs, labels_file)?;

        if images.len() != labels.len() {
            return Err(Error::invalid_dataset(
                labels_path,
                format!("{} labels for {} images", labels.len(), images.len()),
            ));
        }

        let items = images
            .into_iter()
            .zip(labels)
            .map(|(pixels, label)| ImageItem { pixels, label })
            .collect();

        Ok(Self {
            dataset: InMemDataset::new(items),
        })
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Reads an IDX3 image file. Each image is a vector of `28 * 28` bytes.
fn read_images(dirs: &[PathBuf], name: &str) -> Result<Vec<Vec<u8>>> {
    let (path, bytes) = read_dataset_file(dirs, name)?;

    // 16-byte header: magic, count, rows, columns
    if bytes.len() < 16 {
        return Err(Error::invalid_dataset(path, "truncated header"));
    }
    let magic = read_u32(&bytes, 0);
    if magic != IMAGES_MAGIC {
        return Err(Error::invalid_dataset(
            path,
            format!("expected magic number {IMAGES_MAGIC}, found {magic}"),
        ));
    }

    let count = read_u32(&bytes, 4) as usize;
    let rows = read_u32(&bytes, 8) as usize;
    let cols = read_u32(&bytes, 12) as usize;
    if rows != MNIST_HEIGHT || cols != MNIST_WIDTH {
        return Err(Error::invalid_dataset(
            path,
            format!("expected {MNIST_HEIGHT}x{MNIST_WIDTH} images, found {rows}x{cols}"),
        ));
    }

    let body = &bytes[16..];
    let image_size = MNIST_WIDTH * MNIST_HEIGHT;
    if body.len() != count * image_size {
        return Err(Error::invalid_dataset(
            path,
            format!(
                "header announces {count} images but the body holds {} bytes",
                body.len()
            ),
        ));
    }

    Ok(body
        .chunks(image_size)
        .map(|chunk| chunk.to_vec())
        .collect())
}

/// Reads an IDX1 label file.
fn read_labels(dirs: &[PathBuf], name: &str) -> Result<(PathBuf, Vec<u8>)> {
    let (path, bytes) = read_dataset_file(dirs, name)?;

    // 8-byte header: magic, count
    if bytes.len() < 8 {
        return Err(Error::invalid_dataset(path, "truncated header"));
    }
    let magic = read_u32(&bytes, 0);
    if magic != LABELS_MAGIC {
        return Err(Error::invalid_dataset(
            path,
            format!("expected magic number {LABELS_MAGIC}, found {magic}"),
        ));
    }

    let count = read_u32(&bytes, 4) as usize;
    let labels = bytes[8..].to_vec();
    if labels.len() != count {
        return Err(Error::invalid_dataset(
            path,
            format!("header announces {count} labels, found {}", labels.len()),
        ));
    }
    if let Some(label) = labels.iter().find(|label| **label as usize >= NUM_CLASSES) {
        return Err(Error::invalid_dataset(
            path,
            format!("label {label} is out of range"),
        ));
    }

    Ok((path, labels))
}
