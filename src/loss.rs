use burn::{
    module::Param,
    nn::Initializer,
    prelude::*,
};

/// Configuration to create a [center loss](CenterLoss) using the [init function](CenterLossConfig::init).
#[derive(Config, Debug)]
pub struct CenterLossConfig {
    /// Number of classes, one center each.
    #[config(default = 10)]
    pub num_classes: usize,
    /// Size of the embeddings.
    #[config(default = 2)]
    pub feat_dim: usize,
    /// Divide the summed distances by the batch size.
    #[config(default = true)]
    pub size_average: bool,
}

/// Center loss from [A Discriminative Feature Learning Approach for Deep Face
/// Recognition](https://ydwen.github.io/papers/WenECCV16.pdf).
///
/// Each class owns a learned center in the embedding space. The loss is half the squared
/// distance between every embedding and the center of its class.
///
/// Should be created with [CenterLossConfig].
#[derive(Module, Debug)]
pub struct CenterLoss<B: Backend> {
    /// Class centers with shape `[num_classes, feat_dim]`.
    pub centers: Param<Tensor<B, 2>>,
    size_average: bool,
}

impl CenterLossConfig {
    /// Initializes the centers from a standard normal distribution.
    pub fn init<B: Backend>(&self, device: &B::Device) -> CenterLoss<B> {
        let centers = Initializer::Normal {
            mean: 0.0,
            std: 1.0,
        }
        .init([self.num_classes, self.feat_dim], device);

        CenterLoss {
            centers,
            size_average: self.size_average,
        }
    }
}

impl<B: Backend> CenterLoss<B> {
    /// Compute the loss.
    ///
    /// # Shapes
    ///
    /// - features: `[batch_size, feat_dim]`
    /// - targets: `[batch_size]`
    /// - output: `[1]`
    pub fn forward(&self, features: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        let [batch_size, feat_dim] = features.dims();
        let [num_classes, centers_dim] = self.centers.dims();
        assert_eq!(
            feat_dim, centers_dim,
            "Center dimension {centers_dim} doesn't match the feature dimension {feat_dim}"
        );
        debug_assert!(num_classes > 0);

        let centers = self.centers.val().select(0, targets);
        let diff = features - centers;
        let loss = (diff.clone() * diff).sum().div_scalar(2.0);

        if self.size_average {
            loss.div_scalar(batch_size as f32)
        } else {
            loss
        }
    }

    /// Number of classes the centers are learned for.
    pub fn num_classes(&self) -> usize {
        let [num_classes, _] = self.centers.dims();
        num_classes
    }
}

/// Mean negative log-likelihood of the target classes.
///
/// # Shapes
///
/// - log_probs: `[batch_size, num_classes]`
/// - targets: `[batch_size]`
/// - output: `[1]`
pub fn nll_loss<B: Backend>(log_probs: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    let [batch_size, _] = log_probs.dims();
    let targets = targets.reshape([batch_size, 1]);

    log_probs.gather(1, targets).neg().mean()
}

/// The training objective: the classification loss plus the weighted center loss.
#[derive(new, Debug, Clone, Copy)]
pub struct JointLoss {
    /// Weight of the center loss term.
    pub loss_weight: f64,
}

/// The terms of the [joint loss](JointLoss) for one batch.
#[derive(Debug, Clone)]
pub struct JointLossOutput<B: Backend> {
    pub total: Tensor<B, 1>,
    pub nll: Tensor<B, 1>,
    pub center: Tensor<B, 1>,
}

impl JointLoss {
    pub fn forward<B: Backend>(
        &self,
        log_probs: Tensor<B, 2>,
        features: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
        center_loss: &CenterLoss<B>,
    ) -> JointLossOutput<B> {
        let nll = nll_loss(log_probs, targets.clone());
        let center = center_loss.forward(features, targets);
        let total = nll.clone() + center.clone().mul_scalar(self.loss_weight);

        JointLossOutput { total, nll, center }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::GradientsParams;
    use burn::tensor::ElementConversion;

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<NdArray>;

    fn fixed_centers<B: Backend>(device: &B::Device) -> CenterLoss<B> {
        let centers = Tensor::from_floats([[0.0, 0.0], [1.0, 1.0], [-2.0, 3.0]], device);
        CenterLoss {
            centers: Param::from_tensor(centers),
            size_average: true,
        }
    }

    fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f32 {
        tensor.into_scalar().elem::<f32>()
    }

    #[test]
    fn center_loss_is_zero_at_centers() {
        let device = Default::default();
        let loss = fixed_centers::<TestBackend>(&device);
        let features = Tensor::from_floats([[1.0, 1.0], [-2.0, 3.0], [0.0, 0.0]], &device);
        let targets = Tensor::from_ints([1, 2, 0], &device);

        assert_eq!(scalar(loss.forward(features, targets)), 0.0);
    }

    #[test]
    fn center_loss_matches_manual_computation() {
        let device = Default::default();
        let loss = fixed_centers::<TestBackend>(&device);
        let features = Tensor::from_floats([[1.0, 0.0], [2.0, 2.0]], &device);
        let targets = Tensor::from_ints([0, 1], &device);

        // (1 + 0) + (1 + 1) = 3, halved and averaged over 2 samples.
        let value = scalar(loss.forward(features, targets));

        assert!((value - 0.75).abs() < 1e-6);
    }

    #[test]
    fn center_loss_without_size_average_sums() {
        let device = Default::default();
        let mut loss = fixed_centers::<TestBackend>(&device);
        loss.size_average = false;
        let features = Tensor::from_floats([[1.0, 0.0], [2.0, 2.0]], &device);
        let targets = Tensor::from_ints([0, 1], &device);

        let value = scalar(loss.forward(features, targets));

        assert!((value - 1.5).abs() < 1e-6);
    }

    #[test]
    fn init_creates_one_center_per_class() {
        let device = Default::default();
        let loss = CenterLossConfig::new()
            .with_num_classes(7)
            .with_feat_dim(3)
            .init::<TestBackend>(&device);

        assert_eq!(loss.centers.dims(), [7, 3]);
        assert_eq!(loss.num_classes(), 7);
    }

    #[test]
    fn nll_loss_picks_target_log_probs() {
        let device = Default::default();
        let log_probs = Tensor::<TestBackend, 2>::from_floats(
            [[-0.1, -2.0, -3.0], [-1.5, -0.5, -4.0]],
            &device,
        );
        let targets = Tensor::from_ints([0, 2], &device);

        let value = scalar(nll_loss(log_probs, targets));

        assert!((value - 2.05).abs() < 1e-6);
    }

    #[test]
    fn center_gradient_pulls_only_used_centers() {
        let device = Default::default();
        let loss = fixed_centers::<TestAutodiffBackend>(&device);
        let features = Tensor::from_floats([[1.0, 0.0], [3.0, 1.0]], &device).require_grad();
        let targets = Tensor::from_ints([0, 0], &device);

        let output = loss.forward(features.clone(), targets);
        let mut grads = output.backward();
        let feature_grads = features.grad(&grads).unwrap();
        let center_grads = GradientsParams::from_module(&mut grads, &loss);
        let center_grads = center_grads
            .get::<NdArray, 2>(loss.centers.id)
            .unwrap()
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        // d/dc of sum |f - c|^2 / 2 / n = -sum(f - c) / n
        assert_eq!(center_grads, vec![-2.0, -0.5, 0.0, 0.0, 0.0, 0.0]);
        let feature_grads = feature_grads.into_data().to_vec::<f32>().unwrap();
        assert_eq!(feature_grads, vec![0.5, 0.0, 1.5, 0.5]);
    }

    #[test]
    fn joint_loss_weights_center_term() {
        let device = Default::default();
        let center_loss = fixed_centers::<TestBackend>(&device);
        let log_probs = Tensor::from_floats([[-0.5, -1.0, -2.0], [-1.0, -0.25, -3.0]], &device);
        let features = Tensor::from_floats([[1.0, 0.0], [2.0, 2.0]], &device);
        let targets = Tensor::from_ints([0, 1], &device);

        let output = JointLoss::new(2.0).forward(log_probs, features, targets, &center_loss);

        let nll = scalar(output.nll);
        let center = scalar(output.center);
        let total = scalar(output.total);
        assert!((nll - 0.375).abs() < 1e-6);
        assert!((center - 0.75).abs() < 1e-6);
        assert!((total - 1.875).abs() < 1e-6);
    }
}
