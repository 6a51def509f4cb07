use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, PRelu, PReluConfig,
    },
    prelude::*,
    tensor::activation::log_softmax,
};

/// Output channels of the three convolution stages.
const STAGE_CHANNELS: [usize; 3] = [32, 64, 128];

#[derive(Config, Debug)]
pub struct NetConfig {
    /// Number of input channels.
    #[config(default = 1)]
    pub channels: usize,
    /// Height and width of the square input images.
    #[config(default = 28)]
    pub image_size: usize,
    #[config(default = 10)]
    pub num_classes: usize,
    /// Size of the embedding the center loss operates on.
    #[config(default = 2)]
    pub embedding_dim: usize,
}

/// Convolutional classifier with a low dimensional embedding layer.
///
/// Three stages of two 5x5 convolutions followed by max pooling extract the features. The
/// `ip1` layer and its PReLU project them to the embedding, and `ip2` maps the embedding to the
/// class scores.
#[derive(Module, Debug)]
pub struct Net<B: Backend> {
    stages: Vec<ConvStage<B>>,
    ip1: Linear<B>,
    prelu_ip1: PRelu<B>,
    ip2: Linear<B>,
}

#[derive(Module, Debug)]
pub struct ConvStage<B: Backend> {
    conv1: Conv2d<B>,
    prelu1: PRelu<B>,
    conv2: Conv2d<B>,
    prelu2: PRelu<B>,
    pool: MaxPool2d,
}

/// What the network produces for a batch of images.
#[derive(Debug, Clone)]
pub struct NetOutput<B: Backend> {
    /// Embeddings with shape `[batch_size, embedding_dim]`.
    pub features: Tensor<B, 2>,
    /// Log-probabilities with shape `[batch_size, num_classes]`.
    pub log_probs: Tensor<B, 2>,
}

impl NetConfig {
    /// Spatial size of the feature maps after the last pooling stage.
    pub fn feature_map_size(&self) -> usize {
        STAGE_CHANNELS
            .iter()
            .fold(self.image_size, |size, _| size / 2)
    }

    /// Initializes a new network on the given device.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Net<B> {
        let mut stages = Vec::with_capacity(STAGE_CHANNELS.len());
        let mut channels_in = self.channels;
        for channels_out in STAGE_CHANNELS {
            stages.push(ConvStage::new(channels_in, channels_out, device));
            channels_in = channels_out;
        }

        let map_size = self.feature_map_size();
        let ip1 = LinearConfig::new(channels_in * map_size * map_size, self.embedding_dim)
            .init(device);
        let ip2 = LinearConfig::new(self.embedding_dim, self.num_classes)
            .with_bias(false)
            .init(device);

        Net {
            stages,
            ip1,
            prelu_ip1: PReluConfig::new().init(device),
            ip2,
        }
    }
}

impl<B: Backend> ConvStage<B> {
    fn new(channels_in: usize, channels_out: usize, device: &B::Device) -> Self {
        let conv = |channels_in| {
            Conv2dConfig::new([channels_in, channels_out], [5, 5])
                .with_padding(PaddingConfig2d::Explicit(2, 2))
                .init::<B>(device)
        };

        Self {
            conv1: conv(channels_in),
            prelu1: PReluConfig::new().init(device),
            conv2: conv(channels_out),
            prelu2: PReluConfig::new().init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.prelu1.forward(self.conv1.forward(input));
        let x = self.prelu2.forward(self.conv2.forward(x));

        self.pool.forward(x)
    }
}

impl<B: Backend> Net<B> {
    /// # Shapes
    ///   - Images [batch_size, channels, height, width]
    ///   - Features [batch_size, embedding_dim]
    ///   - Log-probabilities [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> NetOutput<B> {
        let x = self
            .stages
            .iter()
            .fold(images, |x, stage| stage.forward(x));
        let x = x.flatten::<2>(1, 3);

        let features = self.prelu_ip1.forward(self.ip1.forward(x));
        let logits = self.ip2.forward(features.clone());

        NetOutput {
            features,
            log_probs: log_softmax(logits, 1),
        }
    }

    #[cfg(test)]
    pub(crate) fn ip2_weight(&self) -> Tensor<B, 2> {
        self.ip2.weight.val()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    #[test]
    fn feature_map_size_floors_odd_sizes() {
        assert_eq!(NetConfig::new().feature_map_size(), 3);
        assert_eq!(NetConfig::new().with_image_size(32).feature_map_size(), 4);
    }

    #[test]
    fn forward_shapes_mnist() {
        let device = Default::default();
        let model = NetConfig::new().init::<TestBackend>(&device);
        let images = Tensor::random([2, 1, 28, 28], Distribution::Default, &device);

        let output = model.forward(images);

        assert_eq!(output.features.dims(), [2, 2]);
        assert_eq!(output.log_probs.dims(), [2, 10]);
    }

    #[test]
    fn forward_shapes_cifar10() {
        let device = Default::default();
        let model = NetConfig::new()
            .with_channels(3)
            .with_image_size(32)
            .init::<TestBackend>(&device);
        let images = Tensor::random([3, 3, 32, 32], Distribution::Default, &device);

        let output = model.forward(images);

        assert_eq!(output.features.dims(), [3, 2]);
        assert_eq!(output.log_probs.dims(), [3, 10]);
    }

    #[test]
    fn classifier_reads_the_returned_embedding() {
        let device = Default::default();
        let model = NetConfig::new().init::<TestBackend>(&device);
        let images = Tensor::random([3, 1, 28, 28], Distribution::Default, &device);

        let output = model.forward(images);
        let expected = log_softmax(model.ip2.forward(output.features), 1)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let actual = output.log_probs.into_data().to_vec::<f32>().unwrap();

        for (expected, actual) in expected.iter().zip(actual) {
            assert!((expected - actual).abs() < 1e-6);
        }
    }

    #[test]
    fn log_probs_are_normalized() {
        let device = Default::default();
        let model = NetConfig::new().init::<TestBackend>(&device);
        let images = Tensor::random([4, 1, 28, 28], Distribution::Default, &device);

        let sums = model
            .forward(images)
            .log_probs
            .exp()
            .sum_dim(1)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        for sum in sums {
            assert!((sum - 1.0).abs() < 1e-4);
        }
    }
}
