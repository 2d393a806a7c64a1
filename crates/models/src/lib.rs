//! Burn model for CIFAR-10 style image classification.
//!
//! `CifarCnn` is a plain VGG-like stack: a sequence of conv blocks (two 3x3 convs with
//! batch norm, a 2x2 max pool and dropout) followed by a dense head. The layer layout
//! mirrors the Keras `Sequential` model the TF.js bundle describes, so every parameter
//! tensor here has exactly one counterpart in the exported weights manifest.
//!
//! The module is backend-agnostic; training wraps it in `Autodiff`, evaluation and export
//! use the inner backend via `valid()`.

use burn::module::{Module, Param};
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, PaddingConfig2d};
use burn::tensor::activation::{relu, softmax};
use burn::tensor::Tensor;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ModelConfigError {
    #[error("block_channels and block_dropout must have the same length ({channels} vs {dropout})")]
    BlockMismatch { channels: usize, dropout: usize },
    #[error("at least one conv block is required")]
    NoBlocks,
    #[error("input size {input} is not divisible by {divisor} (one 2x2 pool per block)")]
    InputSize { input: usize, divisor: usize },
    #[error("dropout rate {0} must be in [0, 1)")]
    DropoutRate(f64),
    #[error("{0} must be non-zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CifarCnnConfig {
    /// Square input side in pixels.
    pub input_size: usize,
    pub in_channels: usize,
    /// Filters of both convs in each block.
    pub block_channels: Vec<usize>,
    /// Dropout rate applied after each block's pool.
    pub block_dropout: Vec<f64>,
    pub dense_hidden: usize,
    pub dense_dropout: f64,
    pub num_classes: usize,
    pub bn_epsilon: f64,
    /// Keras-convention momentum (weight of the old running value).
    pub bn_momentum: f64,
}

impl Default for CifarCnnConfig {
    fn default() -> Self {
        Self {
            input_size: 32,
            in_channels: 3,
            block_channels: vec![32, 64, 128],
            block_dropout: vec![0.2, 0.3, 0.4],
            dense_hidden: 128,
            dense_dropout: 0.5,
            num_classes: 10,
            bn_epsilon: 1e-3,
            bn_momentum: 0.99,
        }
    }
}

impl CifarCnnConfig {
    /// Small variant for smoke tests; same topology, far fewer filters.
    pub fn tiny(input_size: usize) -> Self {
        Self {
            input_size,
            block_channels: vec![4, 8, 8],
            dense_hidden: 16,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ModelConfigError> {
        if self.block_channels.is_empty() {
            return Err(ModelConfigError::NoBlocks);
        }
        if self.block_channels.len() != self.block_dropout.len() {
            return Err(ModelConfigError::BlockMismatch {
                channels: self.block_channels.len(),
                dropout: self.block_dropout.len(),
            });
        }
        if self.in_channels == 0 {
            return Err(ModelConfigError::Zero("in_channels"));
        }
        if self.dense_hidden == 0 {
            return Err(ModelConfigError::Zero("dense_hidden"));
        }
        if self.num_classes == 0 {
            return Err(ModelConfigError::Zero("num_classes"));
        }
        if self.block_channels.iter().any(|c| *c == 0) {
            return Err(ModelConfigError::Zero("block_channels"));
        }
        let divisor = 1usize << self.block_channels.len();
        if self.input_size == 0 || self.input_size % divisor != 0 {
            return Err(ModelConfigError::InputSize {
                input: self.input_size,
                divisor,
            });
        }
        for rate in self
            .block_dropout
            .iter()
            .chain(std::iter::once(&self.dense_dropout))
        {
            if !(0.0..1.0).contains(rate) {
                return Err(ModelConfigError::DropoutRate(*rate));
            }
        }
        Ok(())
    }

    /// Spatial side after all pools.
    pub fn feature_size(&self) -> usize {
        self.input_size >> self.block_channels.len()
    }

    /// Channels entering the dense head.
    pub fn feature_channels(&self) -> usize {
        self.block_channels
            .last()
            .copied()
            .unwrap_or(self.in_channels)
    }

    pub fn flatten_dim(&self) -> usize {
        let side = self.feature_size();
        self.feature_channels() * side * side
    }

    /// Burn uses the complementary momentum convention (weight of the new batch statistic).
    fn burn_bn(&self, features: usize) -> BatchNormConfig {
        BatchNormConfig::new(features)
            .with_epsilon(self.bn_epsilon)
            .with_momentum(1.0 - self.bn_momentum)
    }
}

/// Glorot uniform, the Keras default for conv and dense kernels.
fn glorot() -> Initializer {
    Initializer::XavierUniform { gain: 1.0 }
}

/// Keras starts every bias at zero; burn's initializer covers the bias too.
fn zero_bias<B: burn::tensor::backend::Backend>(
    len: usize,
    device: &B::Device,
) -> Option<Param<Tensor<B, 1>>> {
    Some(Param::from_tensor(Tensor::zeros([len], device)))
}

#[derive(Debug, Module)]
pub struct ConvBlock<B: burn::tensor::backend::Backend> {
    pub conv_a: Conv2d<B>,
    pub bn_a: BatchNorm<B, 2>,
    pub conv_b: Conv2d<B>,
    pub bn_b: BatchNorm<B, 2>,
    pub pool: MaxPool2d,
    pub dropout: Dropout,
}

impl<B: burn::tensor::backend::Backend> ConvBlock<B> {
    fn new(
        cfg: &CifarCnnConfig,
        in_channels: usize,
        out_channels: usize,
        dropout: f64,
        device: &B::Device,
    ) -> Self {
        let conv = |cin: usize| {
            let mut conv: Conv2d<B> = Conv2dConfig::new([cin, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .with_initializer(glorot())
                .init(device);
            conv.bias = zero_bias(out_channels, device);
            conv
        };
        Self {
            conv_a: conv(in_channels),
            bn_a: cfg.burn_bn(out_channels).init(device),
            conv_b: conv(out_channels),
            bn_b: cfg.burn_bn(out_channels).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.bn_a.forward(relu(self.conv_a.forward(input)));
        let x = self.bn_b.forward(relu(self.conv_b.forward(x)));
        self.dropout.forward(self.pool.forward(x))
    }
}

#[derive(Debug, Module)]
pub struct CifarCnn<B: burn::tensor::backend::Backend> {
    pub blocks: Vec<ConvBlock<B>>,
    pub dense: nn::Linear<B>,
    pub dense_bn: BatchNorm<B, 0>,
    pub dense_dropout: Dropout,
    pub head: nn::Linear<B>,
}

impl<B: burn::tensor::backend::Backend> CifarCnn<B> {
    /// Build the network. Call `CifarCnnConfig::validate` first; shapes are not rechecked here.
    pub fn new(cfg: &CifarCnnConfig, device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(cfg.block_channels.len());
        let mut in_channels = cfg.in_channels;
        for (&out_channels, &rate) in cfg.block_channels.iter().zip(&cfg.block_dropout) {
            blocks.push(ConvBlock::new(cfg, in_channels, out_channels, rate, device));
            in_channels = out_channels;
        }
        let mut dense: nn::Linear<B> = nn::LinearConfig::new(cfg.flatten_dim(), cfg.dense_hidden)
            .with_initializer(glorot())
            .init(device);
        dense.bias = zero_bias(cfg.dense_hidden, device);
        let mut head: nn::Linear<B> = nn::LinearConfig::new(cfg.dense_hidden, cfg.num_classes)
            .with_initializer(glorot())
            .init(device);
        head.bias = zero_bias(cfg.num_classes, device);
        Self {
            blocks,
            dense,
            dense_bn: cfg.burn_bn(cfg.dense_hidden).init(device),
            dense_dropout: DropoutConfig::new(cfg.dense_dropout).init(),
            head,
        }
    }

    /// Logits, shape [batch, num_classes]. Input is NCHW in [0, 1].
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x: Tensor<B, 2> = x.flatten(1, 3);
        let x = self.dense_bn.forward(relu(self.dense.forward(x)));
        let x = self.dense_dropout.forward(x);
        self.head.forward(x)
    }

    /// Class probabilities (softmax over logits).
    pub fn forward_probs(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }
}

pub mod prelude {
    pub use super::{CifarCnn, CifarCnnConfig, ConvBlock, ModelConfigError};
}
