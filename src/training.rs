use std::path::Path;

use burn::{
    data::dataloader::DataLoader,
    lr_scheduler::{
        step::{StepLrScheduler, StepLrSchedulerConfig},
        LrScheduler,
    },
    module::AutodiffModule,
    optim::{
        adaptor::OptimizerAdaptor, decay::WeightDecayConfig, momentum::MomentumConfig,
        GradientsParams, Optimizer, Sgd, SgdConfig,
    },
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use crate::{
    checkpoint::{load_checkpoint, load_config, save_checkpoint, ArtifactPaths},
    data::{image_loader, ImageBatch, LoaderOptions},
    dataset::{DatasetKind, Split, NUM_CLASSES},
    error::Error,
    loss::{CenterLoss, CenterLossConfig, JointLoss},
    metrics::{EpochMetrics, RunningMetrics},
    model::{Net, NetConfig},
    visualize::{Embeddings, ScatterPlot},
};

#[derive(Config)]
pub struct TrainingConfig {
    pub dataset: DatasetKind,
    pub model: NetConfig,
    pub center_loss: CenterLossConfig,
    /// Optimizer of the network parameters.
    pub optimizer: SgdConfig,
    #[config(default = 100)]
    pub num_epochs: usize,
    #[config(default = 128)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    /// Initial learning rate of the network optimizer.
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    /// Number of epochs between two learning rate decays.
    #[config(default = 20)]
    pub lr_step_size: usize,
    #[config(default = 0.8)]
    pub lr_gamma: f64,
    /// Learning rate of the centers optimizer.
    #[config(default = 0.5)]
    pub center_learning_rate: f64,
    /// Weight of the center loss in the objective.
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl TrainingConfig {
    /// The setup of the experiments: SGD with momentum and weight decay for the network, plain
    /// SGD for the centers.
    pub fn for_dataset(dataset: DatasetKind) -> Self {
        let model = dataset.model_config();
        let center_loss = CenterLossConfig::new()
            .with_num_classes(NUM_CLASSES)
            .with_feat_dim(model.embedding_dim);
        let optimizer = SgdConfig::new()
            .with_momentum(Some(MomentumConfig::new().with_momentum(0.9).with_dampening(0.0)))
            .with_weight_decay(Some(WeightDecayConfig::new(5e-4)));

        Self::new(dataset, model, center_loss, optimizer)
    }

    pub fn objective(&self) -> JointLoss {
        JointLoss::new(self.loss_weight)
    }

    /// Checks that the network and the centers agree on the classes and the embedding size.
    pub fn validate(&self) -> crate::Result<()> {
        if self.model.num_classes != self.center_loss.num_classes {
            return Err(Error::Config(format!(
                "the network predicts {} classes but {} centers are configured",
                self.model.num_classes, self.center_loss.num_classes
            )));
        }
        if self.model.embedding_dim != self.center_loss.feat_dim {
            return Err(Error::Config(format!(
                "the network embeds in {} dimensions but the centers have {}",
                self.model.embedding_dim, self.center_loss.feat_dim
            )));
        }

        Ok(())
    }

    fn loader_options(&self, split: Split) -> LoaderOptions {
        LoaderOptions {
            batch_size: self.batch_size,
            num_workers: self.num_workers,
            shuffle_seed: match split {
                Split::Train => Some(self.seed),
                Split::Test => None,
            },
        }
    }
}

/// Metrics and embeddings of one training epoch.
#[derive(Debug, Clone)]
pub struct TrainEpochOutput {
    pub metrics: EpochMetrics,
    /// Embedding of every training sample, for visualization.
    pub embeddings: Embeddings,
}

/// Summary of one epoch of the training loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub learning_rate: f64,
    pub train: EpochMetrics,
    pub test: EpochMetrics,
}

/// Jointly optimizes a [network](Net) and the [centers](CenterLoss) of its embeddings.
///
/// Both parameter sets get the gradients of the same backward pass, but each has its own
/// optimizer and learning rate. Only the network learning rate follows the step schedule.
pub struct Trainer<B: AutodiffBackend> {
    model: Net<B>,
    center_loss: CenterLoss<B>,
    model_optim: OptimizerAdaptor<Sgd<B::InnerBackend>, Net<B>, B>,
    center_optim: OptimizerAdaptor<Sgd<B::InnerBackend>, CenterLoss<B>, B>,
    scheduler: StepLrScheduler,
    objective: JointLoss,
    lr: f64,
    center_lr: f64,
    num_classes: usize,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Initializes fresh parameters on `device`.
    pub fn new(config: &TrainingConfig, device: &B::Device) -> crate::Result<Self> {
        Self::from_parts(
            config,
            config.model.init(device),
            config.center_loss.init(device),
        )
    }

    /// Continues the optimization of existing parameters.
    pub fn from_parts(
        config: &TrainingConfig,
        model: Net<B>,
        center_loss: CenterLoss<B>,
    ) -> crate::Result<Self> {
        config.validate()?;

        let mut scheduler = StepLrSchedulerConfig::new(config.learning_rate, config.lr_step_size)
            .with_gamma(config.lr_gamma)
            .init()
            .map_err(Error::Scheduler)?;
        // Epochs are counted from 1, so the first decay happens at epoch `lr_step_size`.
        scheduler.step();

        Ok(Self {
            num_classes: center_loss.num_classes(),
            model,
            center_loss,
            model_optim: config.optimizer.init(),
            center_optim: SgdConfig::new().init(),
            scheduler,
            objective: config.objective(),
            lr: config.learning_rate,
            center_lr: config.center_learning_rate,
        })
    }

    pub fn model(&self) -> &Net<B> {
        &self.model
    }

    pub fn center_loss(&self) -> &CenterLoss<B> {
        &self.center_loss
    }

    pub fn objective(&self) -> JointLoss {
        self.objective
    }

    /// Learning rate of the network optimizer for the current epoch.
    pub fn learning_rate(&self) -> f64 {
        self.lr
    }

    /// Advances the learning rate schedule; called once at the start of every epoch.
    pub fn start_epoch(&mut self) -> f64 {
        self.lr = self.scheduler.step();
        self.lr
    }

    /// Runs one pass over the training data.
    pub fn train_epoch(
        &mut self,
        loader: &dyn DataLoader<B, ImageBatch<B>>,
    ) -> crate::Result<TrainEpochOutput> {
        let embedding_dim = self.center_loss.centers.dims()[1];
        let mut metrics = RunningMetrics::new(self.num_classes);
        let mut embeddings = Embeddings::new(embedding_dim);

        for (iteration, batch) in loader.iter().enumerate() {
            let step = self.train_step(batch)?;
            log::debug!("Iteration {iteration} - loss {:.6}", step.loss);

            metrics.update(step.loss, &step.predictions, &step.labels);
            embeddings.extend(&step.features, &step.labels);
        }

        Ok(TrainEpochOutput {
            metrics: metrics.summary(),
            embeddings,
        })
    }

    /// Forward, backward, then one step of each optimizer.
    pub fn train_step(&mut self, batch: ImageBatch<B>) -> crate::Result<StepOutput> {
        let output = self.model.forward(batch.images);
        let loss = self.objective.forward(
            output.log_probs.clone(),
            output.features.clone(),
            batch.targets.clone(),
            &self.center_loss,
        );

        // Each optimizer only receives the gradients of its own parameters.
        let mut grads = loss.total.backward();
        let model_grads = GradientsParams::from_module(&mut grads, &self.model);
        let center_grads = GradientsParams::from_module(&mut grads, &self.center_loss);

        self.model = self
            .model_optim
            .step(self.lr, self.model.clone(), model_grads);
        self.center_loss =
            self.center_optim
                .step(self.center_lr, self.center_loss.clone(), center_grads);

        StepOutput::new(loss.total, output.log_probs, output.features, batch.targets)
    }
}

/// Host values of one batch.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub loss: f64,
    pub predictions: Vec<usize>,
    pub labels: Vec<usize>,
    /// Row-major embeddings.
    pub features: Vec<f32>,
}

impl StepOutput {
    fn new<B: Backend>(
        loss: Tensor<B, 1>,
        log_probs: Tensor<B, 2>,
        features: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> crate::Result<Self> {
        let predictions = log_probs.argmax(1).flatten::<1>(0, 1);

        Ok(Self {
            loss: loss.into_scalar().elem::<f64>(),
            predictions: int_values(predictions)?,
            labels: int_values(targets)?,
            features: float_values(features)?,
        })
    }
}

fn int_values<B: Backend>(tensor: Tensor<B, 1, Int>) -> crate::Result<Vec<usize>> {
    let values = tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|err| Error::TensorData(format!("{err:?}")))?;

    Ok(values.into_iter().map(|value| value as usize).collect())
}

fn float_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> crate::Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| Error::TensorData(format!("{err:?}")))
}

/// Evaluates the network on a data loader without tracking gradients.
pub fn test<B: Backend>(
    model: &Net<B>,
    center_loss: &CenterLoss<B>,
    objective: &JointLoss,
    loader: &dyn DataLoader<B, ImageBatch<B>>,
) -> crate::Result<EpochMetrics> {
    let mut metrics = RunningMetrics::new(center_loss.num_classes());

    for batch in loader.iter() {
        let output = model.forward(batch.images);
        let loss = objective.forward(
            output.log_probs.clone(),
            output.features.clone(),
            batch.targets.clone(),
            center_loss,
        );
        let step = StepOutput::new(loss.total, output.log_probs, output.features, batch.targets)?;

        metrics.update(step.loss, &step.predictions, &step.labels);
    }

    Ok(metrics.summary())
}

/// Trains a network from scratch, testing, plotting and checkpointing after every epoch.
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    dataset_dir: &Path,
    artifacts: &ArtifactPaths,
    plot: &ScatterPlot,
    device: B::Device,
) -> crate::Result<Vec<EpochRecord>> {
    config.validate()?;
    artifacts.save_config(config)?;
    B::seed(config.seed);

    let train_set = config.dataset.load(dataset_dir, Split::Train)?;
    let test_set = config.dataset.load(dataset_dir, Split::Test)?;
    let loader_train = image_loader::<B, _>(
        config.dataset,
        train_set,
        &config.loader_options(Split::Train),
        &device,
    );
    let loader_test = image_loader::<B::InnerBackend, _>(
        config.dataset,
        test_set,
        &config.loader_options(Split::Test),
        &device,
    );

    let mut trainer = Trainer::<B>::new(config, &device)?;
    let objective = trainer.objective();
    let mut history = Vec::with_capacity(config.num_epochs);

    log::info!("Start training on {:?}", config.dataset);
    for epoch in 1..=config.num_epochs {
        let lr = trainer.start_epoch();

        let output = trainer.train_epoch(loader_train.as_ref())?;
        let test_metrics = test(
            &trainer.model().valid(),
            &trainer.center_loss().valid(),
            &objective,
            loader_test.as_ref(),
        )?;

        log::info!(
            "Epoch: {epoch:>3}, lr: {lr:.6}, train acc: {:<8}, train loss: {:<8}, test acc: {:<8}, test loss: {:<8}",
            output.metrics.f1,
            output.metrics.loss,
            test_metrics.f1,
            test_metrics.loss,
        );

        plot.save(&output.embeddings, epoch, artifacts.plot_path(epoch))?;
        save_checkpoint(
            trainer.model(),
            trainer.center_loss(),
            &artifacts.model_path(epoch),
        )?;

        history.push(EpochRecord {
            epoch,
            learning_rate: lr,
            train: output.metrics,
            test: test_metrics,
        });
    }

    Ok(history)
}

/// Options of the [evaluate] command.
#[derive(Debug, Clone)]
pub struct EvaluateOptions {
    pub batch_size: usize,
    pub num_workers: usize,
}

/// Evaluates a saved checkpoint on the test split.
///
/// The config saved next to the checkpoint is used when present, otherwise the default config of
/// the dataset.
pub fn evaluate<B: Backend>(
    dataset: DatasetKind,
    dataset_dir: &Path,
    model_path: &Path,
    options: &EvaluateOptions,
    device: B::Device,
) -> crate::Result<EpochMetrics> {
    let config = match load_config(model_path)? {
        Some(config) => config,
        None => TrainingConfig::for_dataset(dataset),
    };
    config.validate()?;
    if config.dataset != dataset {
        log::warn!(
            "Checkpoint was trained on {:?} but is evaluated on {:?}",
            config.dataset,
            dataset
        );
    }

    let (model, center_loss) = load_checkpoint::<B>(&config, model_path, &device)?;
    log::info!("Testing a trained model from '{}'", model_path.display());

    let test_set = dataset.load(dataset_dir, Split::Test)?;
    let loader = image_loader::<B, _>(
        dataset,
        test_set,
        &LoaderOptions {
            batch_size: options.batch_size,
            num_workers: options.num_workers,
            shuffle_seed: None,
        },
        &device,
    );

    let metrics = test(&model, &center_loss, &config.objective(), loader.as_ref())?;
    log::info!("test acc: {:<8}, test loss: {:<8}", metrics.f1, metrics.loss);

    Ok(metrics)
}
