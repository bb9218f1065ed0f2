//! NIN classifier with a natural/adversarial batch-norm pair after every conv.

use candle_core::{ModuleT, Tensor};
use candle_nn::{BatchNorm, Conv2d, Conv2dConfig, Dropout, Module, VarBuilder};
use tracing::debug;

use crate::config::AvdNinConfig;
use crate::error::{Error, Result};
use crate::models::shared::image_type::ImageType;
use crate::models::shared::layers::{batch_norm2d, conv2d_normal, same_padding};
use crate::models::shared::pooling::{avg_pool2d, max_pool2d, Pool2dConfig};

/// Two batch norms over the same channels, one per image type.
pub struct AdvBatchNorm {
    nat: BatchNorm,
    adv: BatchNorm,
}

impl AdvBatchNorm {
    pub fn load(num_features: usize, eps: f64, momentum: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            nat: batch_norm2d(num_features, eps, momentum, vb.pp("nat"))?,
            adv: batch_norm2d(num_features, eps, momentum, vb.pp("adv"))?,
        })
    }

    pub fn forward(&self, x: &Tensor, im_type: ImageType, train: bool) -> Result<Tensor> {
        let bn = match im_type {
            ImageType::Natural => &self.nat,
            ImageType::Adversarial => &self.adv,
        };
        Ok(bn.forward_t(x, train)?)
    }
}

pub enum AdvLayer {
    Conv(Conv2d),
    BatchNorm(AdvBatchNorm),
    Relu,
    MaxPool(Pool2dConfig),
    AvgPool(Pool2dConfig),
    Dropout(Dropout),
}

impl AdvLayer {
    pub fn forward(&self, x: &Tensor, im_type: ImageType, train: bool) -> Result<Tensor> {
        match self {
            AdvLayer::Conv(conv) => Ok(conv.forward(x)?),
            AdvLayer::BatchNorm(bn) => bn.forward(x, im_type, train),
            AdvLayer::Relu => Ok(x.relu()?),
            AdvLayer::MaxPool(cfg) => max_pool2d(x, *cfg),
            AdvLayer::AvgPool(cfg) => avg_pool2d(x, *cfg),
            AdvLayer::Dropout(dropout) => Ok(dropout.forward_t(x, train)?),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AdvLayer::Conv(_) => "conv",
            AdvLayer::BatchNorm(_) => "adv_batch_norm",
            AdvLayer::Relu => "relu",
            AdvLayer::MaxPool(_) => "max_pool",
            AdvLayer::AvgPool(_) => "avg_pool",
            AdvLayer::Dropout(_) => "dropout",
        }
    }
}

/// Layers applied in order; only the batch norms look at the image type.
#[derive(Default)]
pub struct AdvSequential {
    layers: Vec<AdvLayer>,
}

impl AdvSequential {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, layer: AdvLayer) {
        self.layers.push(layer);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[AdvLayer] {
        &self.layers
    }

    pub fn forward(&self, x: &Tensor, im_type: ImageType, train: bool) -> Result<Tensor> {
        let mut x = x.clone();
        for layer in &self.layers {
            x = layer.forward(&x, im_type, train)?;
        }
        Ok(x)
    }
}

/// Builds the layer stack; parameter paths are `features.{index}`.
struct StackBuilder<'a> {
    cfg: &'a AvdNinConfig,
    vb: VarBuilder<'a>,
    seq: AdvSequential,
}

impl StackBuilder<'_> {
    fn conv(&mut self, in_c: usize, out_c: usize, kernel_size: usize) -> Result<&mut Self> {
        let idx = self.seq.len();
        let conv = conv2d_normal(
            in_c,
            out_c,
            kernel_size,
            Conv2dConfig {
                padding: same_padding(kernel_size),
                ..Default::default()
            },
            self.cfg.conv_init_std,
            true,
            self.vb.pp(idx.to_string()),
        )?;
        self.seq.push(AdvLayer::Conv(conv));
        Ok(self)
    }

    fn bn(&mut self, channels: usize) -> Result<&mut Self> {
        let idx = self.seq.len();
        let bn = AdvBatchNorm::load(
            channels,
            self.cfg.bn_eps,
            self.cfg.bn_momentum,
            self.vb.pp(idx.to_string()),
        )?;
        self.seq.push(AdvLayer::BatchNorm(bn));
        Ok(self)
    }

    /// conv -> AdvBatchNorm -> ReLU
    fn conv_bn_relu(&mut self, in_c: usize, out_c: usize, kernel_size: usize) -> Result<&mut Self> {
        self.conv(in_c, out_c, kernel_size)?.bn(out_c)?;
        Ok(self.push(AdvLayer::Relu))
    }

    fn push(&mut self, layer: AdvLayer) -> &mut Self {
        self.seq.push(layer);
        self
    }

    fn finish(self) -> AdvSequential {
        self.seq
    }
}

pub struct AvdNin {
    cfg: AvdNinConfig,
    features: AdvSequential,
}

impl AvdNin {
    pub fn load(cfg: AvdNinConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;

        let downsample = Pool2dConfig::new(3, 2).with_ceil_mode();
        let mut b = StackBuilder {
            cfg: &cfg,
            vb: vb.pp("features"),
            seq: AdvSequential::new(),
        };

        b.conv_bn_relu(cfg.in_channels, 192, 5)?
            .conv_bn_relu(192, 160, 1)?
            .conv_bn_relu(160, 96, 1)?
            .push(AdvLayer::MaxPool(downsample))
            .push(AdvLayer::Dropout(Dropout::new(cfg.dropout)));
        b.conv_bn_relu(96, 192, 5)?
            .conv_bn_relu(192, 192, 1)?
            .conv_bn_relu(192, 192, 1)?
            .push(AdvLayer::AvgPool(downsample))
            .push(AdvLayer::Dropout(Dropout::new(cfg.dropout)));
        b.conv_bn_relu(192, 192, 3)?
            .conv_bn_relu(192, 192, 1)?
            .conv(192, cfg.num_classes, 1)?
            .push(AdvLayer::Relu)
            .push(AdvLayer::AvgPool(Pool2dConfig::new(8, 1)));

        let features = b.finish();
        debug!(
            "Built AvdNin: {} layers, {} classes",
            features.len(),
            cfg.num_classes
        );
        Ok(Self { cfg, features })
    }

    pub fn config(&self) -> &AvdNinConfig {
        &self.cfg
    }

    pub fn features(&self) -> &AdvSequential {
        &self.features
    }

    /// Class scores `(B, num_classes)` for `(B, C, 32, 32)` inputs.
    pub fn forward(&self, x: &Tensor, im_type: ImageType, train: bool) -> Result<Tensor> {
        let dims = x.dims();
        if dims.len() != 4 || dims[1] != self.cfg.in_channels {
            return Err(Error::InvalidInput(format!(
                "Expected input of shape (B, {}, 32, 32), got {:?}",
                self.cfg.in_channels, dims
            )));
        }

        let out = self.features.forward(x, im_type, train)?;
        let (b, c, h, w) = out.dims4()?;
        if (c, h, w) != (self.cfg.num_classes, 1, 1) {
            return Err(Error::InvalidInput(format!(
                "Input {:?} reduces to a {h}x{w} score map; expected 1x1 (use 32x32 images)",
                dims
            )));
        }
        Ok(out.reshape((b, self.cfg.num_classes))?)
    }
}
