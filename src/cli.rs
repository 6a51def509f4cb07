use std::path::PathBuf;

use burn::config::Config;
use clap::{Args, Parser, Subcommand};

use crate::{
    checkpoint::ArtifactPaths,
    dataset::DatasetKind,
    error::{Error, Result},
    training::{EvaluateOptions, TrainingConfig},
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Also write the logs to this file
    #[arg(long, global = true, value_parser = parse_log_file)]
    pub log_file: Option<PathBuf>,

    /// Log every training iteration
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a classifier with center loss
    Train(TrainArgs),
    /// Evaluate a saved checkpoint on the test split
    Test(TestArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Dataset to train on [default: mnist]
    #[arg(long, value_enum)]
    pub dataset: Option<DatasetKind>,

    /// Directory holding the dataset files
    #[arg(long, default_value = "../inputs/")]
    pub dataset_dir: PathBuf,

    /// Checkpoint path, `{}` is replaced by the epoch number
    #[arg(long, default_value = "../outputs/models/checkpoints/center_epoch_{}.pth")]
    pub model_path_template: String,

    /// Embedding plot path, `{}` is replaced by the epoch number
    #[arg(long, default_value = "../outputs/visual/epoch_{}.png")]
    pub plot_path_template: String,

    /// Training config file, the flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub num_epochs: Option<usize>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub num_workers: Option<usize>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Initial learning rate of the network
    #[arg(long)]
    pub learning_rate: Option<f64>,

    /// Learning rate of the class centers
    #[arg(long)]
    pub center_learning_rate: Option<f64>,

    /// Weight of the center loss
    #[arg(long)]
    pub loss_weight: Option<f64>,
}

#[derive(Args, Debug)]
pub struct TestArgs {
    /// Dataset the checkpoint was trained on
    #[arg(long, value_enum, default_value_t = DatasetKind::Mnist)]
    pub dataset: DatasetKind,

    /// Directory holding the dataset files
    #[arg(long, default_value = "../inputs/")]
    pub dataset_dir: PathBuf,

    /// Checkpoint to evaluate
    #[arg(long, default_value = "../outputs/models/center_epoch_100.pth")]
    pub model_path: PathBuf,

    #[arg(long, default_value_t = 128)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,
}

fn parse_log_file(value: &str) -> std::result::Result<PathBuf, String> {
    let path = PathBuf::from(value);
    match path.file_name() {
        Some(_) => Ok(path),
        None => Err(format!("'{value}' does not name a file")),
    }
}

impl TrainArgs {
    /// Builds the training config from the config file or the dataset defaults, then applies the
    /// flags given on the command line.
    pub fn training_config(&self) -> Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let config = TrainingConfig::load(path)
                    .map_err(|err| Error::Config(format!("'{}': {err:?}", path.display())))?;
                if let Some(dataset) = self.dataset {
                    if dataset != config.dataset {
                        return Err(Error::Config(format!(
                            "'{}' is a {:?} config but --dataset is {:?}",
                            path.display(),
                            config.dataset,
                            dataset
                        )));
                    }
                }
                config
            }
            None => TrainingConfig::for_dataset(self.dataset.unwrap_or(DatasetKind::Mnist)),
        };

        if let Some(num_epochs) = self.num_epochs {
            config.num_epochs = num_epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(num_workers) = self.num_workers {
            config.num_workers = num_workers;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(learning_rate) = self.learning_rate {
            config.learning_rate = learning_rate;
        }
        if let Some(center_learning_rate) = self.center_learning_rate {
            config.center_learning_rate = center_learning_rate;
        }
        if let Some(loss_weight) = self.loss_weight {
            config.loss_weight = loss_weight;
        }

        Ok(config)
    }

    pub fn artifacts(&self) -> ArtifactPaths {
        ArtifactPaths::new(
            self.model_path_template.clone(),
            self.plot_path_template.clone(),
        )
    }
}

impl TestArgs {
    pub fn options(&self) -> EvaluateOptions {
        EvaluateOptions {
            batch_size: self.batch_size,
            num_workers: self.num_workers,
        }
    }
}
