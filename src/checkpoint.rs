use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    config::Config,
    module::Module,
    record::CompactRecorder,
    tensor::backend::Backend,
};

use crate::{
    error::{Error, Result},
    loss::CenterLoss,
    model::Net,
    training::TrainingConfig,
};

/// Extension the [recorder](CompactRecorder) gives to the files it writes.
const RECORD_EXTENSION: &str = "mpk";
const CONFIG_FILE: &str = "config.json";
const CENTERS_SUFFIX: &str = "_centers";

/// Where the per-epoch artifacts are written.
///
/// A `{}` in a template is replaced by the epoch number, zero-padded to three digits. Templates
/// without a placeholder get `_NNN` inserted before their extension instead.
#[derive(new, Debug, Clone)]
pub struct ArtifactPaths {
    pub model_template: String,
    pub plot_template: String,
}

impl ArtifactPaths {
    /// Path of the network checkpoint of an epoch.
    pub fn model_path(&self, epoch: usize) -> PathBuf {
        fill_template(&self.model_template, epoch)
    }

    /// Path of the embedding plot of an epoch.
    pub fn plot_path(&self, epoch: usize) -> PathBuf {
        fill_template(&self.plot_template, epoch)
    }

    /// The training config is stored next to the checkpoints.
    pub fn config_path(&self) -> PathBuf {
        config_path(&self.model_path(0))
    }

    pub fn save_config(&self, config: &TrainingConfig) -> Result<()> {
        let path = self.config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
        }

        config.save(&path).map_err(|err| Error::io(&path, err))?;
        log::info!("Saved training config to '{}'", path.display());

        Ok(())
    }
}

fn fill_template(template: &str, epoch: usize) -> PathBuf {
    let epoch = format!("{epoch:03}");

    if template.contains("{}") {
        return PathBuf::from(template.replacen("{}", &epoch, 1));
    }

    // The epoch goes between the stem and the extension.
    let path = Path::new(template);
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(extension) => format!("{stem}_{epoch}.{}", extension.to_string_lossy()),
        None => format!("{stem}_{epoch}"),
    };

    path.with_file_name(file_name)
}

fn config_path(model_path: &Path) -> PathBuf {
    match model_path.parent() {
        Some(parent) => parent.join(CONFIG_FILE),
        None => PathBuf::from(CONFIG_FILE),
    }
}

/// Path of the centers saved along a network checkpoint.
pub fn centers_path(model_path: &Path) -> PathBuf {
    let stem = model_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    model_path.with_file_name(format!("{stem}{CENTERS_SUFFIX}.{RECORD_EXTENSION}"))
}

/// Path the recorder actually writes for a checkpoint path.
pub fn record_path(path: &Path) -> PathBuf {
    path.with_extension(RECORD_EXTENSION)
}

/// Saves the network to `model_path` and its centers to the sibling [centers path](centers_path).
pub fn save_checkpoint<B: Backend>(
    model: &Net<B>,
    center_loss: &CenterLoss<B>,
    model_path: &Path,
) -> Result<()> {
    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
    }

    let recorder = CompactRecorder::new();
    model
        .clone()
        .save_file(model_path.to_path_buf(), &recorder)
        .map_err(|err| Error::Record(format!("{err:?}")))?;
    center_loss
        .clone()
        .save_file(centers_path(model_path), &recorder)
        .map_err(|err| Error::Record(format!("{err:?}")))?;

    log::info!("Saved checkpoint to '{}'", record_path(model_path).display());

    Ok(())
}

/// Loads a checkpoint written by [save_checkpoint].
///
/// When the centers file is missing the centers are freshly initialized, so the center loss
/// term of the evaluation is only indicative.
pub fn load_checkpoint<B: Backend>(
    config: &TrainingConfig,
    model_path: &Path,
    device: &B::Device,
) -> Result<(Net<B>, CenterLoss<B>)> {
    let recorder = CompactRecorder::new();

    let model = config
        .model
        .init::<B>(device)
        .load_file(model_path.to_path_buf(), &recorder, device)
        .map_err(|err| Error::Record(format!("{err:?}")))?;

    let centers = centers_path(model_path);
    let center_loss = config.center_loss.init::<B>(device);
    let center_loss = if centers.exists() {
        center_loss
            .load_file(centers, &recorder, device)
            .map_err(|err| Error::Record(format!("{err:?}")))?
    } else {
        log::warn!(
            "No centers found at '{}', using randomly initialized centers",
            centers.display()
        );
        center_loss
    };

    Ok((model, center_loss))
}

/// Loads the training config stored next to a checkpoint, if any.
pub fn load_config(model_path: &Path) -> Result<Option<TrainingConfig>> {
    let path = config_path(model_path);
    if !path.exists() {
        return Ok(None);
    }

    TrainingConfig::load(&path)
        .map(Some)
        .map_err(|err| Error::Config(format!("'{}': {err:?}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetKind;
    use crate::visualize::{Embeddings, ScatterPlot};
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn templates_are_zero_padded() {
        let paths = ArtifactPaths::new(
            "outputs/models/mnist_center_epoch_{}.pth".into(),
            "outputs/visual/epoch_{}.png".into(),
        );

        assert_eq!(
            paths.model_path(7),
            PathBuf::from("outputs/models/mnist_center_epoch_007.pth")
        );
        assert_eq!(paths.plot_path(100), PathBuf::from("outputs/visual/epoch_100.png"));
        assert_eq!(paths.config_path(), PathBuf::from("outputs/models/config.json"));
    }

    #[test]
    fn templates_without_placeholder_get_a_suffix() {
        let paths = ArtifactPaths::new("model".into(), "plots/embedding".into());

        assert_eq!(paths.model_path(12), PathBuf::from("model_012"));
        assert_eq!(paths.plot_path(3), PathBuf::from("plots/embedding_003"));
        assert_eq!(paths.config_path(), PathBuf::from("config.json"));
    }

    #[test]
    fn suffix_goes_before_the_extension() {
        let paths = ArtifactPaths::new("out/model.pth".into(), "out/plot.png".into());

        assert_eq!(paths.model_path(1), PathBuf::from("out/model_001.pth"));
        assert_eq!(paths.plot_path(2), PathBuf::from("out/plot_002.png"));
        assert_ne!(
            record_path(&paths.model_path(1)),
            record_path(&paths.model_path(2))
        );
        assert_ne!(
            centers_path(&paths.model_path(1)),
            centers_path(&paths.model_path(2))
        );
    }

    #[test]
    fn plot_template_without_placeholder_saves() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("plot.png");
        let paths = ArtifactPaths::new("unused".into(), template.to_string_lossy().into_owned());
        let plot = ScatterPlot {
            width: 120,
            height: 90,
            ..Default::default()
        };

        plot.save(&Embeddings::new(2), 1, paths.plot_path(1)).unwrap();

        assert!(dir.path().join("plot_001.png").exists());
    }

    #[test]
    fn missing_centers_fall_back_to_fresh_ones() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = TrainingConfig::for_dataset(DatasetKind::Mnist);
        let model = config.model.init::<TestBackend>(&device);
        let center_loss = config.center_loss.init::<TestBackend>(&device);
        let model_path = dir.path().join("net_epoch_001.pth");

        save_checkpoint(&model, &center_loss, &model_path).unwrap();
        std::fs::remove_file(centers_path(&model_path)).unwrap();

        let (_model, loaded) = load_checkpoint::<TestBackend>(&config, &model_path, &device).unwrap();

        assert_eq!(loaded.centers.dims(), [10, 2]);
        assert_eq!(loaded.num_classes(), 10);
    }

    #[test]
    fn centers_are_stored_next_to_the_model() {
        assert_eq!(
            centers_path(Path::new("out/net_epoch_001.pth")),
            PathBuf::from("out/net_epoch_001_centers.mpk")
        );
        assert_eq!(
            record_path(Path::new("out/net_epoch_001.pth")),
            PathBuf::from("out/net_epoch_001.mpk")
        );
    }

    #[test]
    fn checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = TrainingConfig::for_dataset(DatasetKind::Mnist);
        let model = config.model.init::<TestBackend>(&device);
        let center_loss = config.center_loss.init::<TestBackend>(&device);
        let model_path = dir.path().join("checkpoints").join("net_epoch_001.pth");

        save_checkpoint(&model, &center_loss, &model_path).unwrap();
        assert!(record_path(&model_path).exists());
        assert!(centers_path(&model_path).exists());

        let (_model, loaded) = load_checkpoint::<TestBackend>(&config, &model_path, &device).unwrap();

        let expected = center_loss.centers.val().into_data().to_vec::<f32>().unwrap();
        let actual = loaded.centers.val().into_data().to_vec::<f32>().unwrap();
        for (expected, actual) in expected.iter().zip(actual) {
            // Half precision records.
            assert!((expected - actual).abs() < 1e-2);
        }
    }

    #[test]
    fn missing_model_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = TrainingConfig::for_dataset(DatasetKind::Mnist);

        let result = load_checkpoint::<TestBackend>(&config, &dir.path().join("nope"), &device);

        assert!(matches!(result, Err(Error::Record(_))));
    }

    #[test]
    fn config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("models").join("net_{}");
        let paths = ArtifactPaths::new(template.to_string_lossy().into_owned(), "unused".into());
        let config = TrainingConfig::for_dataset(DatasetKind::Cifar10).with_num_epochs(3);

        paths.save_config(&config).unwrap();
        let loaded = load_config(&paths.model_path(1)).unwrap().unwrap();

        assert_eq!(loaded.dataset, DatasetKind::Cifar10);
        assert_eq!(loaded.num_epochs, 3);
        assert_eq!(loaded.model.channels, 3);
        assert!(load_config(&dir.path().join("elsewhere").join("net"))
            .unwrap()
            .is_none());
    }
}
