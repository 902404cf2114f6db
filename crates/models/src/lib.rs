//! Burn modules for facial landmark detection.
//!
//! This crate defines the two networks the trainer optimizes:
//! - `PfldBackbone`: lightweight multi-scale backbone regressing landmark
//!   coordinates from 112x112 face crops.
//! - `AuxiliaryNet`: head-pose (Euler angle) head over the backbone's shared
//!   feature map, used only to shape the training loss.
//!
//! These are pure Burn Modules with no awareness of datasets or the training
//! loop; the `training` crate owns both.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Conv + batch norm + ReLU, the building block both networks are made of.
#[derive(Debug, Module)]
pub struct ConvBnRelu<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBnRelu<B> {
    fn new(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        padding: usize,
        groups: usize,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new(channels, [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .init(device);
        let bn = BatchNormConfig::new(channels[1]).init(device);
        Self { conv, bn }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        relu(self.bn.forward(self.conv.forward(input)))
    }
}

#[derive(Debug, Clone)]
pub struct PfldBackboneConfig {
    /// Number of 2D facial keypoints; the landmark head emits twice this.
    pub num_landmarks: usize,
    /// Channel width of the early stages.
    pub base_channels: usize,
}

impl Default for PfldBackboneConfig {
    fn default() -> Self {
        Self {
            num_landmarks: 98,
            base_channels: 64,
        }
    }
}

/// Landmark backbone for 112x112 RGB face crops.
///
/// The forward pass returns the intermediate 28x28 feature map alongside the
/// landmark vector; the feature map feeds [`AuxiliaryNet`] during training.
/// The landmark head concatenates pooled features from three scales (14x14,
/// 7x7 and 1x1) before the final linear projection.
#[derive(Debug, Module)]
pub struct PfldBackbone<B: Backend> {
    conv1: ConvBnRelu<B>,
    depthwise2: ConvBnRelu<B>,
    block3a: ConvBnRelu<B>,
    block3b: ConvBnRelu<B>,
    block4: ConvBnRelu<B>,
    block5: ConvBnRelu<B>,
    block6: ConvBnRelu<B>,
    conv7: ConvBnRelu<B>,
    conv8: ConvBnRelu<B>,
    pool: AdaptiveAvgPool2d,
    fc: Linear<B>,
}

impl<B: Backend> PfldBackbone<B> {
    pub fn new(cfg: &PfldBackboneConfig, device: &B::Device) -> Self {
        let c = cfg.base_channels;
        let conv1 = ConvBnRelu::new([3, c], 3, 2, 1, 1, device);
        let depthwise2 = ConvBnRelu::new([c, c], 3, 1, 1, c, device);
        let block3a = ConvBnRelu::new([c, c], 3, 2, 1, 1, device);
        let block3b = ConvBnRelu::new([c, c], 3, 1, 1, 1, device);
        let block4 = ConvBnRelu::new([c, 2 * c], 3, 2, 1, 1, device);
        let block5 = ConvBnRelu::new([2 * c, 2 * c], 3, 1, 1, 1, device);
        let block6 = ConvBnRelu::new([2 * c, 16], 3, 1, 1, 1, device);
        let conv7 = ConvBnRelu::new([16, 32], 3, 2, 1, 1, device);
        let conv8 = ConvBnRelu::new([32, 128], 7, 1, 0, 1, device);
        let pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let fc = LinearConfig::new(16 + 32 + 128, 2 * cfg.num_landmarks).init(device);
        Self {
            conv1,
            depthwise2,
            block3a,
            block3b,
            block4,
            block5,
            block6,
            conv7,
            conv8,
            pool,
            fc,
        }
    }

    /// Returns `(features, landmarks)` where `features` is the shared 28x28
    /// map consumed by the auxiliary head and `landmarks` has shape
    /// `[batch, 2 * num_landmarks]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 2>) {
        let x = self.conv1.forward(images);
        let x = self.depthwise2.forward(x);
        let x = self.block3b.forward(self.block3a.forward(x));
        let features = x.clone();
        let x = self.block4.forward(x);
        let x = self.block5.forward(x);
        let x = self.block6.forward(x);
        let s1 = self.pool.forward(x.clone()).flatten::<2>(1, 3);
        let x = self.conv7.forward(x);
        let s2 = self.pool.forward(x.clone()).flatten::<2>(1, 3);
        let x = self.conv8.forward(x);
        let s3 = x.flatten::<2>(1, 3);
        let landmarks = self.fc.forward(Tensor::cat(vec![s1, s2, s3], 1));
        (features, landmarks)
    }
}

#[derive(Debug, Clone)]
pub struct AuxiliaryNetConfig {
    /// Channels of the backbone feature map this head consumes.
    pub in_channels: usize,
    /// Euler angles predicted (yaw, pitch, roll).
    pub num_angles: usize,
}

impl Default for AuxiliaryNetConfig {
    fn default() -> Self {
        Self {
            in_channels: 64,
            num_angles: 3,
        }
    }
}

/// Head-pose head over the shared backbone features. Only used to shape the
/// training loss; inference needs the backbone alone.
#[derive(Debug, Module)]
pub struct AuxiliaryNet<B: Backend> {
    conv1: ConvBnRelu<B>,
    conv2: ConvBnRelu<B>,
    conv3: ConvBnRelu<B>,
    conv4: ConvBnRelu<B>,
    fc1: Linear<B>,
    fc2: Linear<B>,
}

impl<B: Backend> AuxiliaryNet<B> {
    pub fn new(cfg: &AuxiliaryNetConfig, device: &B::Device) -> Self {
        let conv1 = ConvBnRelu::new([cfg.in_channels, 128], 3, 2, 1, 1, device);
        let conv2 = ConvBnRelu::new([128, 128], 3, 1, 1, 1, device);
        let conv3 = ConvBnRelu::new([128, 32], 3, 2, 1, 1, device);
        let conv4 = ConvBnRelu::new([32, 128], 7, 1, 0, 1, device);
        let fc1 = LinearConfig::new(128, 32).init(device);
        let fc2 = LinearConfig::new(32, cfg.num_angles).init(device);
        Self {
            conv1,
            conv2,
            conv3,
            conv4,
            fc1,
            fc2,
        }
    }

    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(features);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);
        let x = self.conv4.forward(x);
        let x = x.flatten::<2>(1, 3);
        let x = relu(self.fc1.forward(x));
        self.fc2.forward(x)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PfldConfig {
    pub backbone: PfldBackboneConfig,
    pub auxiliary: AuxiliaryNetConfig,
}

/// Backbone plus auxiliary head under one module so a single optimizer can
/// step both parameter collections, while checkpoints still record them as
/// separate files.
#[derive(Debug, Module)]
pub struct Pfld<B: Backend> {
    pub backbone: PfldBackbone<B>,
    pub auxiliary: AuxiliaryNet<B>,
}

impl<B: Backend> Pfld<B> {
    pub fn new(cfg: &PfldConfig, device: &B::Device) -> Self {
        Self {
            backbone: PfldBackbone::new(&cfg.backbone, device),
            auxiliary: AuxiliaryNet::new(&cfg.auxiliary, device),
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let (features, landmarks) = self.backbone.forward(images);
        let angles = self.auxiliary.forward(features);
        (landmarks, angles)
    }
}

pub mod prelude {
    pub use super::{
        AuxiliaryNet, AuxiliaryNetConfig, Pfld, PfldBackbone, PfldBackboneConfig, PfldConfig,
    };
}
