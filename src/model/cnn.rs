//! Multi-Head CNN for Self-Labelling
//!
//! A convolutional trunk shared by several independent classification heads.
//! Each head predicts one pseudo-label vocabulary; multiple heads decorrelate
//! the clustering solutions found during training.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig,
        PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use super::config::ModelConfig;

/// A CNN block with Conv2d, BatchNorm, ReLU, and MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    /// Create a new convolutional block that halves the spatial resolution
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Self {
            conv,
            bn,
            relu: Relu::new(),
            pool,
        }
    }

    /// Forward pass through the block
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Self-labelling network: shared trunk plus independent linear heads.
///
/// The `single_head` flag narrows the forward pass to head 0 while the
/// label-assignment solver runs; the epoch loop toggles it around each
/// reassignment call and restores it afterwards.
#[derive(Module, Debug)]
pub struct SelfLabelNet<B: Backend> {
    conv1: ConvBlock<B>,
    conv2: ConvBlock<B>,
    conv3: ConvBlock<B>,
    global_pool: AdaptiveAvgPool2d,
    embed: Linear<B>,
    dropout: Dropout,
    heads: Vec<Linear<B>>,

    /// When set, `forward` returns only head 0's logits
    pub single_head: bool,

    embed_dim: usize,
    clusters_per_head: usize,
}

impl<B: Backend> SelfLabelNet<B> {
    /// Create a new network from configuration
    pub fn new(config: &ModelConfig, device: &B::Device) -> Self {
        let base = config.base_filters;

        let conv1 = ConvBlock::new(config.in_channels, base, device);
        let conv2 = ConvBlock::new(base, base * 2, device);
        let conv3 = ConvBlock::new(base * 2, base * 4, device);

        let global_pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let embed = LinearConfig::new(base * 4, config.embed_dim).init(device);
        let dropout = DropoutConfig::new(config.dropout_rate).init();

        let heads = (0..config.num_heads)
            .map(|_| LinearConfig::new(config.embed_dim, config.clusters_per_head).init(device))
            .collect();

        Self {
            conv1,
            conv2,
            conv3,
            global_pool,
            embed,
            dropout,
            heads,
            single_head: false,
            embed_dim: config.embed_dim,
            clusters_per_head: config.clusters_per_head,
        }
    }

    /// Penultimate-layer representation shared by all heads
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, channels, height, width]
    ///
    /// # Returns
    /// * Embedding tensor of shape [batch_size, embed_dim]
    pub fn forward_features(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);

        // [B, C, H, W] -> [B, C, 1, 1] -> [B, C]
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.embed.forward(x);
        let x = Relu::new().forward(x);
        self.dropout.forward(x)
    }

    /// Logits of one head given the shared representation
    pub fn head_logits(&self, head: usize, features: Tensor<B, 2>) -> Tensor<B, 2> {
        self.heads[head].forward(features)
    }

    /// Forward pass producing one logits tensor per active head
    ///
    /// Returns all heads normally, or only head 0 when `single_head` is set.
    pub fn forward(&self, x: Tensor<B, 4>) -> Vec<Tensor<B, 2>> {
        let features = self.forward_features(x);
        let active = if self.single_head { 1 } else { self.heads.len() };

        self.heads[..active]
            .iter()
            .map(|head| head.forward(features.clone()))
            .collect()
    }

    /// Mean absolute weight of the embedding and of each head, for the
    /// end-of-epoch parameter summary
    pub fn parameter_summary(&self) -> Vec<(String, f64)> {
        use burn::tensor::ElementConversion;

        let mean_abs = |t: Tensor<B, 2>| -> f64 { t.abs().mean().into_scalar().elem() };

        let mut summary = vec![("embed".to_string(), mean_abs(self.embed.weight.val()))];
        for (i, head) in self.heads.iter().enumerate() {
            summary.push((format!("head{}", i), mean_abs(head.weight.val())));
        }
        summary
    }

    /// Number of classification heads
    pub fn num_heads(&self) -> usize {
        self.heads.len()
    }

    /// Width of the shared embedding
    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    /// Clusters predicted by each head
    pub fn clusters_per_head(&self) -> usize {
        self.clusters_per_head
    }
}
