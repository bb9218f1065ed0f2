//! Layers that make up the NIN feature blocks.

use candle_core::{ModuleT, Tensor};
use candle_nn::{BatchNorm, Conv2d, Conv2dConfig, Module, VarBuilder};

use crate::config::NinConfig;
use crate::error::Result;
use crate::models::shared::layers::{batch_norm2d, conv2d_normal, he_conv_std, same_padding};
use crate::models::shared::pooling::{avg_pool2d, global_avg_pool2d, max_pool2d, Pool2dConfig};

/// Conv (no bias) -> BatchNorm -> ReLU, spatial size preserved.
pub struct BasicBlock {
    conv: Conv2d,
    bn: BatchNorm,
    out_channels: usize,
}

impl BasicBlock {
    pub fn load(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        cfg: &NinConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let vb = vb.pp("layers");
        let conv = conv2d_normal(
            in_channels,
            out_channels,
            kernel_size,
            Conv2dConfig {
                padding: same_padding(kernel_size),
                ..Default::default()
            },
            he_conv_std(kernel_size, out_channels),
            false,
            vb.pp("Conv"),
        )?;
        let bn = batch_norm2d(out_channels, cfg.bn_eps, cfg.bn_momentum, vb.pp("BatchNorm"))?;
        Ok(Self {
            conv,
            bn,
            out_channels,
        })
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.conv.forward(x)?;
        let x = self.bn.forward_t(&x, train)?;
        Ok(x.relu()?)
    }
}

/// Conv (no bias) -> BatchNorm, concatenated after its own input.
///
/// The output carries `in + out` channels: the first half becomes the latent
/// mean and the second half its log-variance.
pub struct EncBlock {
    conv: Conv2d,
    bn: BatchNorm,
}

impl EncBlock {
    pub fn load(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        cfg: &NinConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let vb = vb.pp("layers");
        let conv = conv2d_normal(
            in_channels,
            out_channels,
            kernel_size,
            Conv2dConfig {
                padding: same_padding(kernel_size),
                ..Default::default()
            },
            he_conv_std(kernel_size, out_channels),
            false,
            vb.pp("Conv"),
        )?;
        let bn = batch_norm2d(out_channels, cfg.bn_eps, cfg.bn_momentum, vb.pp("BatchNorm"))?;
        Ok(Self { conv, bn })
    }

    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let out = self.conv.forward(x)?;
        let out = self.bn.forward_t(&out, train)?;
        Ok(Tensor::cat(&[x, &out], 1)?)
    }
}

pub enum StageLayer {
    Basic(BasicBlock),
    Encode(EncBlock),
    MaxPool(Pool2dConfig),
    AvgPool(Pool2dConfig),
    GlobalAvgPool,
}

impl StageLayer {
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            StageLayer::Basic(block) => block.forward(x, train),
            StageLayer::Encode(block) => block.forward(x, train),
            StageLayer::MaxPool(cfg) => max_pool2d(x, *cfg),
            StageLayer::AvgPool(cfg) => avg_pool2d(x, *cfg),
            StageLayer::GlobalAvgPool => global_avg_pool2d(x),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StageLayer::Basic(_) => "basic_block",
            StageLayer::Encode(_) => "enc_block",
            StageLayer::MaxPool(_) => "max_pool",
            StageLayer::AvgPool(_) => "avg_pool",
            StageLayer::GlobalAvgPool => "global_avg_pool",
        }
    }
}

/// One selectable feature block: named layers applied in order.
pub struct FeatureBlock {
    layers: Vec<(String, StageLayer)>,
}

impl FeatureBlock {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn push(&mut self, name: impl Into<String>, layer: StageLayer) {
        self.layers.push((name.into(), layer));
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|(name, _)| name.as_str())
    }

    pub fn layers(&self) -> &[(String, StageLayer)] {
        &self.layers
    }

    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let mut x = x.clone();
        for (_, layer) in &self.layers {
            x = layer.forward(&x, train)?;
        }
        Ok(x)
    }
}

impl Default for FeatureBlock {
    fn default() -> Self {
        Self::new()
    }
}
